//! Result sink: artifact files and the run log.
//!
//! Artifacts land at `<output_dir>/<team>_<variant>_<trial>.txt`, overwritten
//! on regeneration. The run log is an append-only JSON-lines file per run
//! and stage: `<output_root>/logs/<run>/<stage>.log`.
//!
//! Neither a failed log append nor the log's existence influences retry
//! decisions; append failures are reported through `tracing` only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::model::WorkItem;

/// Append-only, timestamped, newline-delimited event log.
pub struct RunLog {
    path: PathBuf,
    stage: String,
    // Serializes appends so concurrent workers never interleave lines.
    file: Mutex<File>,
}

impl RunLog {
    /// Create a fresh per-run folder under `<output_root>/logs` and open
    /// the stage's log file in it.
    pub async fn create(output_root: &Path, stage: &str) -> Result<Self> {
        let run = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string();
        Self::open(&output_root.join("logs").join(run), stage).await
    }

    /// Open (or create) `<folder>/<stage>.log` for appending.
    pub async fn open(folder: &Path, stage: &str) -> Result<Self> {
        tokio::fs::create_dir_all(folder).await?;
        let path = folder.join(format!("{stage}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        debug!(path = %path.display(), "run log opened");

        Ok(Self {
            path,
            stage: stage.to_string(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an event: one JSON line plus a `tracing` event.
    pub async fn record(&self, kind: EventKind) {
        let event = Event {
            timestamp: Utc::now(),
            stage: self.stage.clone(),
            kind,
        };
        emit(&event);

        if let Err(e) = self.append(&event).await {
            warn!(path = %self.path.display(), error = %e, "run log append failed");
        }
    }

    async fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Parse every event in a run log file.
    pub fn read_events(path: &Path) -> Result<Vec<Event>> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }
}

fn emit(event: &Event) {
    let stage = event.stage.as_str();
    match &event.kind {
        EventKind::Planned { id, .. } => debug!(stage, %id, "saved to store"),
        EventKind::Dispatched { id, attempt, .. } => debug!(stage, %id, attempt, "dispatched"),
        EventKind::Succeeded { id, attempt, chars, .. } => {
            info!(stage, %id, attempt, chars, "generation succeeded")
        }
        EventKind::Failed {
            id,
            attempt,
            error,
            transient,
            ..
        } => warn!(stage, %id, attempt, transient, %error, "generation failed"),
        EventKind::Retrying {
            id,
            attempt,
            delay_ms,
            ..
        } => info!(stage, %id, attempt, delay_ms, "retrying"),
        kind if kind.is_diagnostic() => warn!(stage, event = ?kind, "diagnostic"),
        kind => info!(stage, event = ?kind, "progress"),
    }
}

/// Writes generation output and records lifecycle events.
pub struct ResultSink {
    log: Arc<RunLog>,
}

impl ResultSink {
    pub fn new(log: Arc<RunLog>) -> Self {
        Self { log }
    }

    /// Write `text` verbatim to the item's artifact path, replacing any prior file.
    pub async fn write_artifact(&self, item: &WorkItem, text: &str) -> Result<PathBuf> {
        // The planner creates this directory, but a drain may run in a
        // later process after the output tree was moved or pruned.
        tokio::fs::create_dir_all(&item.output_dir).await?;
        let path = item.artifact_path();
        tokio::fs::write(&path, text).await?;
        Ok(path)
    }

    pub async fn record(&self, kind: EventKind) {
        self.log.record(kind).await;
    }
}
