//! Core data model.
//!
//! A work item is one (team, variant, trial) generation request. Its identity
//! is derived from those coordinates so planning the same input twice lands
//! on the same keys.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work tracked by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Deterministic identifier: `{phase}_{team}_{variant}_{trial}`.
    pub id: WorkId,

    /// Team that owns the source prompt.
    pub team: String,

    /// Variant symbol substituted into the prompt.
    pub variant: String,

    /// Fully substituted prompt text sent to the generation client.
    pub prompt: String,

    /// Trial index, 1-based.
    pub trial: u32,

    /// Directory the artifact is written into.
    pub output_dir: PathBuf,

    /// Set exactly once, by the drain loop. Never reset.
    pub completed: bool,

    /// How the item finished. `None` while pending.
    pub outcome: Option<OutcomeKind>,

    /// Error detail for fatal or exhausted outcomes.
    pub detail: Option<String>,

    /// Generation attempts recorded at completion.
    pub attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// File name of this item's artifact.
    pub fn artifact_name(&self) -> String {
        format!("{}_{}_{}.txt", self.team, self.variant, self.trial)
    }

    /// Full path of this item's artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(self.artifact_name())
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub String);

impl WorkId {
    /// Derive the identity of a (phase, team, variant, trial) unit.
    pub fn derive(phase: &str, team: &str, variant: &str, trial: u32) -> Self {
        Self(format!("{phase}_{team}_{variant}_{trial}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal classification of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Non-empty response, artifact written.
    Success,
    /// Empty response. Artifact written with no content, not retried.
    Empty,
    /// Non-transient failure. No artifact.
    Fatal,
    /// Transient failures hit the attempt bound. No artifact.
    Exhausted,
}

impl OutcomeKind {
    /// Whether an artifact exists for this outcome.
    pub fn has_artifact(self) -> bool {
        matches!(self, OutcomeKind::Success | OutcomeKind::Empty)
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Empty => "empty",
            OutcomeKind::Fatal => "fatal",
            OutcomeKind::Exhausted => "exhausted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OutcomeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(OutcomeKind::Success),
            "empty" => Ok(OutcomeKind::Empty),
            "fatal" => Ok(OutcomeKind::Fatal),
            "exhausted" => Ok(OutcomeKind::Exhausted),
            _ => Err(Error::Other(format!("unknown outcome: {s}"))),
        }
    }
}

/// Result of dispatching a work item, stored with it on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    /// Error message for fatal or exhausted outcomes.
    pub detail: Option<String>,
    /// Total generation attempts, including the final one.
    pub attempts: u32,
}

impl Outcome {
    pub fn new(kind: OutcomeKind, attempts: u32) -> Self {
        Self {
            kind,
            detail: None,
            attempts,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Ordered alphabet of symbols substituted into the placeholder token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantSet(Vec<String>);

impl VariantSet {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(symbols.into_iter().map(Into::into).collect())
    }

    /// The uppercase Latin alphabet, `A` through `Z`.
    pub fn latin_uppercase() -> Self {
        Self::new(('A'..='Z').map(String::from))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First symbol that appears more than once, if any.
    pub fn first_duplicate(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.iter().find(|s| !seen.insert(*s))
    }
}

impl Default for VariantSet {
    fn default() -> Self {
        Self::latin_uppercase()
    }
}

// ---------------------------------------------------------------------------
// New work
// ---------------------------------------------------------------------------

/// A planned work item, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub id: WorkId,
    pub team: String,
    pub variant: String,
    pub prompt: String,
    pub trial: u32,
    pub output_dir: PathBuf,
}

impl NewWorkItem {
    pub fn new(
        phase: &str,
        team: impl Into<String>,
        variant: impl Into<String>,
        trial: u32,
    ) -> Self {
        let team = team.into();
        let variant = variant.into();
        Self {
            id: WorkId::derive(phase, &team, &variant, trial),
            team,
            variant,
            prompt: String::new(),
            trial,
            output_dir: PathBuf::new(),
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_derived_from_coordinates() {
        let a = NewWorkItem::new("final", "teamA", "B", 3);
        let b = NewWorkItem::new("final", "teamA", "B", 3);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str(), "final_teamA_B_3");
    }

    #[test]
    fn latin_alphabet_has_26_unique_symbols() {
        let variants = VariantSet::latin_uppercase();
        assert_eq!(variants.len(), 26);
        assert_eq!(variants.iter().next(), Some("A"));
        assert_eq!(variants.iter().last(), Some("Z"));
        assert!(variants.first_duplicate().is_none());
    }

    #[test]
    fn duplicate_variant_is_reported() {
        let variants = VariantSet::new(["A", "B", "A"]);
        assert_eq!(variants.first_duplicate(), Some("A"));
    }

    #[test]
    fn outcome_kind_round_trips_through_display() {
        for kind in [
            OutcomeKind::Success,
            OutcomeKind::Empty,
            OutcomeKind::Fatal,
            OutcomeKind::Exhausted,
        ] {
            assert_eq!(kind.to_string().parse::<OutcomeKind>().unwrap(), kind);
        }
        assert!("merged".parse::<OutcomeKind>().is_err());
    }
}
