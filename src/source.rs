//! Prompt sources: one file per team in a flat folder.
//!
//! The team identifier is the file name minus its last extension
//! (`team.v2.txt` → `team.v2`). Hidden files and subdirectories are ignored.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

/// One team's raw prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSource {
    pub team: String,
    pub path: PathBuf,
    pub text: String,
}

/// Load every prompt file in `dir`, sorted by team.
///
/// # Errors
/// Fails if the folder or one of its files cannot be read. Bytes that are
/// not valid UTF-8 are replaced with U+FFFD and logged.
pub fn load_sources(dir: &Path) -> Result<Vec<PromptSource>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Source(format!("cannot read source folder {}: {e}", dir.display()))
    })?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(team) = team_name(&path) else {
            continue;
        };

        let bytes = std::fs::read(&path)
            .map_err(|e| Error::Source(format!("cannot read {}: {e}", path.display())))?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e.utf8_error(),
                    "prompt is not valid UTF-8, decoding lossily"
                );
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        sources.push(PromptSource { team, path, text });
    }

    sources.sort_by(|a, b| a.team.cmp(&b.team));
    Ok(sources)
}

fn team_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_is_file_name_without_last_extension() {
        assert_eq!(team_name(Path::new("p/teamA.txt")).as_deref(), Some("teamA"));
        assert_eq!(team_name(Path::new("p/team.v2.txt")).as_deref(), Some("team.v2"));
        assert_eq!(team_name(Path::new("p/plain")).as_deref(), Some("plain"));
        assert_eq!(team_name(Path::new("p/.DS_Store")), None);
    }

    #[test]
    fn loads_files_sorted_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeta.txt"), "z <OBJECT>").unwrap();
        std::fs::write(dir.path().join("alpha.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let sources = load_sources(dir.path()).unwrap();
        let teams: Vec<_> = sources.iter().map(|s| s.team.as_str()).collect();
        assert_eq!(teams, ["alpha", "zeta"]);
        assert_eq!(sources[0].text, "");
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily_alongside_valid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.txt"), "draw <OBJECT> é").unwrap();
        std::fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, b'x']).unwrap();

        let sources = load_sources(dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].team, "bad");
        assert_eq!(sources[0].text, "\u{FFFD}\u{FFFD}x");
        assert_eq!(sources[1].team, "good");
        assert_eq!(sources[1].text, "draw <OBJECT> é");
    }

    #[test]
    fn missing_folder_is_a_source_error() {
        let err = load_sources(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::Source(_)));
    }
}
