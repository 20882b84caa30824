//! Durable work item store.
//!
//! [`WorkStore`] is the capability the planner and drain loop depend on.
//! [`Db`] implements it over a SQLite connection pool; the table's primary
//! key enforces unique identities even with concurrent planners.

pub mod work;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::{Error, Result};
use crate::model::{NewWorkItem, Outcome, WorkId, WorkItem};

pub use work::CreateResult;

/// Persistence capability for work items.
///
/// Implementations must tolerate concurrent point updates from many
/// workers.
pub trait WorkStore: Send + Sync + 'static {
    /// Persist a pending item. An existing identity is reported, not overwritten.
    fn create(&self, new: NewWorkItem) -> impl Future<Output = Result<CreateResult>> + Send;

    /// Up to `limit` items whose completion flag is false. No ordering guarantee.
    fn list_pending(&self, limit: usize) -> impl Future<Output = Result<Vec<WorkItem>>> + Send;

    /// Flip the completion flag and record the outcome.
    ///
    /// Returns `false` if the item was already completed; the flag is
    /// never written twice.
    fn mark_completed(
        &self,
        id: &WorkId,
        outcome: &Outcome,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Count items, optionally filtered by completion flag.
    fn count(&self, completed: Option<bool>) -> impl Future<Output = Result<u64>> + Send;

    fn get(&self, id: &WorkId) -> impl Future<Output = Result<WorkItem>> + Send;
}

/// Database handle. Owns the connection pool.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Connect to a SQLite database, creating the file if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::open(options(url)?.create_if_missing(true)).await
    }

    /// Connect to a database that an earlier run already created.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the expected path when the file does
    /// not exist. Nothing is created on disk.
    pub async fn open_existing(url: &str) -> Result<Self> {
        let options = options(url)?.create_if_missing(false);
        let path = options.get_filename();
        if !is_memory(url) && !path.exists() {
            return Err(Error::Config(format!(
                "no work store at {}; plan a run first or pass --output/--database-url",
                path.display()
            )));
        }
        Self::open(options).await
    }

    async fn open(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, migrated and ready (for testing).
    ///
    /// Pinned to a single connection that never idles out; each SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check: run a `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn options(url: &str) -> Result<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5)))
}

fn is_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
