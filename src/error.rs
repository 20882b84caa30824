//! Error types for promptq.

use thiserror::Error;

use crate::llm::GenerationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("prompt source error: {0}")]
    Source(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The store reports pending work but none of it can be selected.
    #[error("drain stalled: {pending} item(s) pending but none selectable")]
    Stalled { pending: u64 },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
