//! Drain loop: keeps the worker pool full until no pending work remains.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::db::WorkStore;
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::llm::Generate;
use crate::model::{OutcomeKind, WorkId};
use crate::sink::ResultSink;

use super::BackoffPolicy;
use super::dispatch::{ItemReport, Worker};
use super::pool::WorkerPool;

/// Configuration for a drain.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Upper bound on concurrently running generations.
    pub max_in_flight: usize,
    pub backoff: BackoffPolicy,
    /// Attempts per item before giving up; `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            backoff: BackoffPolicy::default(),
            max_attempts: Some(50),
        }
    }
}

impl DrainConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight,
            backoff: config.backoff_policy(),
            max_attempts: config.attempt_limit(),
        }
    }
}

/// Totals for one drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Items handed to a worker.
    pub dispatched: u64,
    pub succeeded: u64,
    pub empty: u64,
    pub fatal: u64,
    pub exhausted: u64,
    /// Transient failures that were retried.
    pub retries: u64,
    /// Items given back as pending by cancellation.
    pub released: u64,
    /// Completion writes that failed at least once.
    pub deferred_writes: u64,
    pub peak_in_flight: usize,
    pub cancelled: bool,
}

impl DrainReport {
    fn absorb(&mut self, item: ItemReport) {
        self.retries += u64::from(item.retries);
        let Some(outcome) = item.outcome else {
            self.released += 1;
            return;
        };
        match outcome.kind {
            OutcomeKind::Success => self.succeeded += 1,
            OutcomeKind::Empty => self.empty += 1,
            OutcomeKind::Fatal => self.fatal += 1,
            OutcomeKind::Exhausted => self.exhausted += 1,
        }
        if !item.saved {
            self.deferred_writes += 1;
        }
    }
}

/// Drains pending work items through a bounded worker pool.
pub struct Drain<S, G> {
    store: Arc<S>,
    client: Arc<G>,
    sink: Arc<ResultSink>,
    config: DrainConfig,
    pool: Arc<WorkerPool>,
    cancel: CancellationToken,
}

impl<S, G> Clone for Drain<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            client: Arc::clone(&self.client),
            sink: Arc::clone(&self.sink),
            config: self.config.clone(),
            pool: Arc::clone(&self.pool),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: WorkStore, G: Generate> Drain<S, G> {
    pub fn new(store: Arc<S>, client: Arc<G>, sink: Arc<ResultSink>, config: DrainConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(config.max_in_flight.max(1)));
        Self {
            store,
            client,
            sink,
            config,
            pool,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop dispatching. In-flight items finish their current call; items
    /// waiting on a backoff are released as pending.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Items not yet completed.
    pub async fn pending_count(&self) -> Result<u64> {
        let total = self.store.count(None).await?;
        let completed = self.store.count(Some(true)).await?;
        Ok(total.saturating_sub(completed))
    }

    /// Run until no pending item remains or the drain is cancelled.
    ///
    /// # Errors
    /// Returns [`Error::Stalled`] when pending items exist but none can be
    /// listed and nothing is running.
    pub async fn run(&self) -> Result<DrainReport> {
        let worker = Arc::new(Worker {
            store: Arc::clone(&self.store),
            client: Arc::clone(&self.client),
            sink: Arc::clone(&self.sink),
            pool: Arc::clone(&self.pool),
            cancel: self.cancel.clone(),
            backoff: self.config.backoff,
            max_attempts: self.config.max_attempts,
        });
        let mut tasks = JoinSet::new();
        let mut report = DrainReport::default();

        info!(
            max_in_flight = self.pool.capacity(),
            max_attempts = ?self.config.max_attempts,
            "drain started"
        );

        let result = self.drive(&worker, &mut tasks, &mut report).await;

        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut report);
        }
        self.flush_deferred().await;

        let unsaved = self.pool.deferred_count();
        if unsaved > 0 {
            warn!(unsaved, "completion writes still failing; items remain pending");
        }

        report.peak_in_flight = self.pool.peak_in_flight();
        report.cancelled = self.cancel.is_cancelled();

        self.sink
            .record(EventKind::DrainFinished {
                dispatched: report.dispatched,
                succeeded: report.succeeded,
                empty: report.empty,
                fatal: report.fatal,
                exhausted: report.exhausted,
                retries: report.retries,
                cancelled: report.cancelled,
            })
            .await;

        result.map(|()| report)
    }

    async fn drive(
        &self,
        worker: &Arc<Worker<S, G>>,
        tasks: &mut JoinSet<ItemReport>,
        report: &mut DrainReport,
    ) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                info!("drain cancelled, waiting for in-flight work");
                return Ok(());
            }

            self.flush_deferred().await;

            let pending = match self.pending_count().await {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(error = %e, "pending count failed");
                    self.wait(tasks, report).await;
                    continue;
                }
            };
            if pending == 0 && tasks.is_empty() {
                debug!("no pending work");
                return Ok(());
            }

            let spawned = match self.dispatch_batch(worker, tasks).await {
                Ok(spawned) => spawned,
                Err(e) => {
                    warn!(error = %e, "listing pending work failed");
                    self.wait(tasks, report).await;
                    continue;
                }
            };
            report.dispatched += spawned as u64;
            if spawned > 0 {
                continue;
            }

            if tasks.is_empty() && self.pool.deferred_count() == 0 {
                return Err(Error::Stalled { pending });
            }
            self.wait(tasks, report).await;
        }
    }

    /// Fill free permits with pending items nobody has claimed.
    async fn dispatch_batch(
        &self,
        worker: &Arc<Worker<S, G>>,
        tasks: &mut JoinSet<ItemReport>,
    ) -> Result<usize> {
        let free = self.pool.free();
        if free == 0 {
            return Ok(0);
        }

        // Snapshot claims before querying so an item completing between the
        // two steps is never listed as unclaimed.
        let claimed: HashSet<WorkId> = self.pool.claimed();
        let items = self.store.list_pending(free + claimed.len()).await?;

        let mut spawned = 0;
        for item in items {
            if spawned == free {
                break;
            }
            if claimed.contains(&item.id) {
                continue;
            }
            let Some(slot) = self.pool.try_acquire(&item.id) else {
                continue;
            };
            debug!(id = %slot.id(), "dispatching");
            tasks.spawn(Arc::clone(worker).process(item, slot));
            spawned += 1;
        }
        Ok(spawned)
    }

    /// Block until a worker finishes, a backoff elapses, or cancellation.
    async fn wait(&self, tasks: &mut JoinSet<ItemReport>, report: &mut DrainReport) {
        if tasks.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(self.config.backoff.delay(1)) => {}
                _ = self.cancel.cancelled() => {}
            }
            return;
        }
        tokio::select! {
            joined = tasks.join_next() => {
                if let Some(joined) = joined {
                    collect(joined, report);
                }
            }
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Retry completion writes that failed earlier.
    async fn flush_deferred(&self) {
        for (id, outcome) in self.pool.deferred() {
            match self.store.mark_completed(&id, &outcome).await {
                Ok(_) => {
                    debug!(%id, "deferred completion written");
                    self.pool.settle(&id);
                }
                Err(e) => warn!(%id, error = %e, "deferred completion failed again"),
            }
        }
    }
}

fn collect(joined: std::result::Result<ItemReport, JoinError>, report: &mut DrainReport) {
    match joined {
        Ok(item) => report.absorb(item),
        // The slot was dropped during unwinding, so the item is pending again.
        Err(e) => error!(error = %e, "worker task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Outcome;
    use std::time::Duration;

    #[test]
    fn config_follows_run_config() {
        let run = RunConfig {
            max_in_flight: 3,
            retry_backoff_ms: 20,
            max_attempts: 0,
            ..RunConfig::default()
        };
        let config = DrainConfig::from_run_config(&run);

        assert_eq!(config.max_in_flight, 3);
        assert_eq!(config.backoff, BackoffPolicy::Fixed(Duration::from_millis(20)));
        assert_eq!(config.max_attempts, None);
    }

    #[test]
    fn report_tallies_outcomes() {
        let mut report = DrainReport::default();
        let id = WorkId::derive("final", "t", "A", 1);
        report.absorb(ItemReport {
            id: id.clone(),
            outcome: Some(Outcome::new(OutcomeKind::Success, 3)),
            retries: 2,
            saved: true,
        });
        report.absorb(ItemReport {
            id: id.clone(),
            outcome: Some(Outcome::new(OutcomeKind::Fatal, 1)),
            retries: 0,
            saved: false,
        });
        report.absorb(ItemReport {
            id,
            outcome: None,
            retries: 1,
            saved: false,
        });

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.fatal, 1);
        assert_eq!(report.released, 1);
        assert_eq!(report.retries, 3);
        assert_eq!(report.deferred_writes, 1);
    }
}
