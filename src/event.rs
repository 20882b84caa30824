//! Structured events written to the run log.
//!
//! Every observable step of planning and draining produces one event.
//! Events are the only progress report a run emits: there is no separate
//! summary file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{OutcomeKind, WorkId, WorkItem};

/// A structured event, one per run log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// Processing stage the run log belongs to (e.g. `raw`).
    pub stage: String,
    /// What happened.
    pub kind: EventKind,
}

/// The (team, variant, trial) coordinates of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub team: String,
    pub variant: String,
    pub trial: u32,
}

impl From<&WorkItem> for Unit {
    fn from(item: &WorkItem) -> Self {
        Self {
            team: item.team.clone(),
            variant: item.variant.clone(),
            trial: item.trial,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The source folder held no prompt files.
    NoSources,
    /// A prompt file was empty; nothing planned for the team.
    EmptySource {
        team: String,
    },
    TeamPlanned {
        team: String,
        variants: usize,
    },
    /// A work item was saved to the store.
    Planned {
        id: WorkId,
        unit: Unit,
    },
    Dispatched {
        id: WorkId,
        unit: Unit,
        attempt: u32,
    },
    Succeeded {
        id: WorkId,
        unit: Unit,
        attempt: u32,
        chars: usize,
    },
    EmptyResponse {
        id: WorkId,
        unit: Unit,
        attempt: u32,
    },
    Failed {
        id: WorkId,
        unit: Unit,
        attempt: u32,
        error: String,
        transient: bool,
    },
    Retrying {
        id: WorkId,
        unit: Unit,
        attempt: u32,
        delay_ms: u64,
    },
    Exhausted {
        id: WorkId,
        unit: Unit,
        attempts: u32,
    },
    /// Marking an item completed failed; the write is retried later.
    StoreError {
        id: WorkId,
        outcome: OutcomeKind,
        error: String,
    },
    DrainFinished {
        dispatched: u64,
        succeeded: u64,
        empty: u64,
        fatal: u64,
        exhausted: u64,
        retries: u64,
        cancelled: bool,
    },
}

impl EventKind {
    /// Whether the event reports a problem.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            EventKind::EmptySource { .. }
                | EventKind::EmptyResponse { .. }
                | EventKind::Failed { .. }
                | EventKind::Exhausted { .. }
                | EventKind::StoreError { .. }
        )
    }
}
