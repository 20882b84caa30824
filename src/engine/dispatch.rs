//! Per-item lifecycle: call the model, classify, retry, write, complete.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, warn};

use crate::db::WorkStore;
use crate::event::{EventKind, Unit};
use crate::llm::Generate;
use crate::model::{Outcome, OutcomeKind, WorkId, WorkItem};
use crate::sink::ResultSink;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, start_item_span};

use super::BackoffPolicy;
use super::pool::{Slot, WorkerPool};

/// What became of one dispatched item.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub id: WorkId,
    /// `None` when cancellation released the item back to pending.
    pub outcome: Option<Outcome>,
    pub retries: u32,
    /// Whether the completion flag was written.
    pub saved: bool,
}

/// Shared context for every worker task.
pub(crate) struct Worker<S, G> {
    pub(crate) store: Arc<S>,
    pub(crate) client: Arc<G>,
    pub(crate) sink: Arc<ResultSink>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) cancel: CancellationToken,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) max_attempts: Option<u32>,
}

impl<S: WorkStore, G: Generate> Worker<S, G> {
    /// Run one item to a terminal outcome and record it.
    ///
    /// The slot is held until the completion write has been attempted.
    pub(crate) async fn process(self: Arc<Self>, item: WorkItem, slot: Slot) -> ItemReport {
        let span = start_item_span(&item);
        let (outcome, retries) = self.attempt(&item).instrument(span.clone()).await;

        let saved = match &outcome {
            Some(outcome) => {
                record_outcome(&span, outcome.kind, outcome.attempts);
                self.complete(&item.id, outcome).instrument(span).await
            }
            None => false,
        };

        drop(slot);
        ItemReport {
            id: item.id,
            outcome,
            retries,
            saved,
        }
    }

    /// The attempt loop. Retries of one item are strictly sequential.
    async fn attempt(&self, item: &WorkItem) -> (Option<Outcome>, u32) {
        let unit = Unit::from(item);
        let mut retries = 0;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.sink
                .record(EventKind::Dispatched {
                    id: item.id.clone(),
                    unit: unit.clone(),
                    attempt,
                })
                .await;

            let started = Instant::now();
            let result = self.client.generate(&item.prompt).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            let err = match result {
                Ok(text) => {
                    metrics::generation_duration_ms()
                        .record(elapsed_ms, &[KeyValue::new("result", "ok")]);
                    return (Some(self.store_text(item, &unit, attempt, &text).await), retries);
                }
                Err(err) => err,
            };

            let transient = err.is_transient();
            metrics::generation_duration_ms().record(
                elapsed_ms,
                &[KeyValue::new(
                    "result",
                    if transient { "transient" } else { "fatal" },
                )],
            );
            self.sink
                .record(EventKind::Failed {
                    id: item.id.clone(),
                    unit: unit.clone(),
                    attempt,
                    error: err.detail.clone(),
                    transient,
                })
                .await;

            if !transient {
                let outcome = Outcome::new(OutcomeKind::Fatal, attempt).with_detail(err.detail);
                return (Some(outcome), retries);
            }

            if self.max_attempts.is_some_and(|max| attempt >= max) {
                self.sink
                    .record(EventKind::Exhausted {
                        id: item.id.clone(),
                        unit: unit.clone(),
                        attempts: attempt,
                    })
                    .await;
                let outcome =
                    Outcome::new(OutcomeKind::Exhausted, attempt).with_detail(err.detail);
                return (Some(outcome), retries);
            }

            if self.cancel.is_cancelled() {
                return (None, retries);
            }

            retries += 1;
            let delay = self.backoff.delay(retries);
            metrics::generation_retries().add(1, &[]);
            self.sink
                .record(EventKind::Retrying {
                    id: item.id.clone(),
                    unit: unit.clone(),
                    attempt: attempt + 1,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                })
                .await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return (None, retries),
            }
        }
    }

    /// Write a successful (possibly empty) response.
    async fn store_text(&self, item: &WorkItem, unit: &Unit, attempt: u32, text: &str) -> Outcome {
        let kind = if text.is_empty() {
            self.sink
                .record(EventKind::EmptyResponse {
                    id: item.id.clone(),
                    unit: unit.clone(),
                    attempt,
                })
                .await;
            OutcomeKind::Empty
        } else {
            OutcomeKind::Success
        };

        if let Err(e) = self.sink.write_artifact(item, text).await {
            let error = format!("artifact write failed: {e}");
            self.sink
                .record(EventKind::Failed {
                    id: item.id.clone(),
                    unit: unit.clone(),
                    attempt,
                    error: error.clone(),
                    transient: false,
                })
                .await;
            return Outcome::new(OutcomeKind::Fatal, attempt).with_detail(error);
        }

        if kind == OutcomeKind::Success {
            self.sink
                .record(EventKind::Succeeded {
                    id: item.id.clone(),
                    unit: unit.clone(),
                    attempt,
                    chars: text.chars().count(),
                })
                .await;
        }
        Outcome::new(kind, attempt)
    }

    /// Flip the completion flag. On a store error the outcome is parked in
    /// the pool and retried by the drain loop.
    async fn complete(&self, id: &WorkId, outcome: &Outcome) -> bool {
        match self.store.mark_completed(id, outcome).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(%id, "item was already completed");
                true
            }
            Err(e) => {
                self.pool.defer(id.clone(), outcome.clone());
                self.sink
                    .record(EventKind::StoreError {
                        id: id.clone(),
                        outcome: outcome.kind,
                        error: e.to_string(),
                    })
                    .await;
                false
            }
        }
    }
}
