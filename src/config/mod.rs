//! Typed configuration.
//!
//! [`Config`] holds process-level settings from environment variables;
//! sensitive values are wrapped in `secrecy::SecretString` to prevent log
//! leaks. [`RunConfig`] holds the fan-out and drain parameters of one run,
//! loaded from an optional TOML file and overridden by CLI flags.

pub mod secrets;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::engine::BackoffPolicy;
use crate::error::{Error, Result};
use crate::model::VariantSet;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug)]
pub struct Config {
    pub openai_api_key: Option<SecretString>,
    pub database_url: Option<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub model: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            openai_api_key: optional_var("OPENAI_API_KEY").map(SecretString::from),
            database_url: optional_var("DATABASE_URL"),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            model: optional_var("PROMPTQ_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// The API key, required by any command that calls the model.
    pub fn api_key(&self) -> Result<&SecretString> {
        self.openai_api_key.as_ref().ok_or_else(|| {
            Error::Config("required environment variable OPENAI_API_KEY is not set".to_string())
        })
    }

    /// Store URL: `DATABASE_URL` if set, else a SQLite file under `output_root`.
    pub fn database_url_for(&self, output_root: &Path) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}?mode=rwc",
                output_root.join("promptq.db").display()
            ),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Retry delay shape for transient failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Parameters of one fan-out and drain run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Prefix of every work item identity.
    pub phase: String,
    /// Processing stage; names the artifact subfolder and the run log file.
    pub stage: String,
    /// Literal token replaced by each variant symbol.
    pub placeholder: String,
    pub variants: VariantSet,
    pub trials: u32,
    /// Upper bound on concurrent generation calls.
    pub max_in_flight: usize,
    pub retry_backoff_ms: u64,
    pub backoff: BackoffKind,
    /// Ceiling for exponential backoff.
    pub max_backoff_ms: u64,
    /// Attempts per item before a transient failure becomes terminal.
    /// Zero removes the bound.
    pub max_attempts: u32,
    pub output_root: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            phase: "final".to_string(),
            stage: "raw".to_string(),
            placeholder: "<OBJECT>".to_string(),
            variants: VariantSet::latin_uppercase(),
            trials: 10,
            max_in_flight: 10,
            retry_backoff_ms: 1_000,
            backoff: BackoffKind::Fixed,
            max_backoff_ms: 30_000,
            max_attempts: 50,
            output_root: None,
        }
    }
}

impl RunConfig {
    /// Load a run config from a TOML file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read run config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad run config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject settings the drain cannot make progress with.
    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(Error::Config("trials must be at least 1".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config("max_in_flight must be at least 1".to_string()));
        }
        if self.variants.is_empty() {
            return Err(Error::Config("variant set is empty".to_string()));
        }
        if let Some(dup) = self.variants.first_duplicate() {
            return Err(Error::Config(format!("duplicate variant: {dup}")));
        }
        if self.placeholder.is_empty() {
            return Err(Error::Config("placeholder token is empty".to_string()));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        match self.backoff {
            BackoffKind::Fixed => BackoffPolicy::Fixed(self.retry_backoff()),
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                base: self.retry_backoff(),
                max: Duration::from_millis(self.max_backoff_ms),
            },
        }
    }

    /// Attempt bound, `None` when unbounded.
    pub fn attempt_limit(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    /// Output root: explicit setting, else `competition` next to the source folder.
    pub fn resolve_output_root(&self, source: Option<&Path>) -> PathBuf {
        if let Some(root) = &self.output_root {
            return root.clone();
        }
        match source {
            Some(src) => src.join("..").join("competition"),
            None => PathBuf::from("competition"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.variants.len(), 26);
        assert_eq!(config.trials, 10);
        assert_eq!(config.attempt_limit(), Some(50));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RunConfig::from_toml(
            r#"
            trials = 2
            variants = ["A", "B"]
            backoff = "exponential"
            "#,
        )
        .unwrap();
        assert_eq!(config.trials, 2);
        assert_eq!(config.variants, VariantSet::new(["A", "B"]));
        assert_eq!(config.placeholder, "<OBJECT>");
        assert_eq!(
            config.backoff_policy(),
            BackoffPolicy::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn zero_max_attempts_is_unbounded() {
        let config = RunConfig {
            max_attempts: 0,
            ..RunConfig::default()
        };
        assert_eq!(config.attempt_limit(), None);
    }

    #[test]
    fn output_root_defaults_next_to_source() {
        let config = RunConfig::default();
        let root = config.resolve_output_root(Some(Path::new("data/prompts")));
        assert_eq!(root, Path::new("data/prompts/../competition"));
    }
}
