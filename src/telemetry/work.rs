//! Per-item span helpers for the drain loop.

use tracing::Span;

use crate::model::{OutcomeKind, WorkItem};

/// Start a span covering every attempt of one work item.
///
/// `work.outcome` and `work.attempts` are declared empty and filled by
/// [`record_outcome`].
pub fn start_item_span(item: &WorkItem) -> Span {
    tracing::info_span!(
        "work.dispatch",
        "work.id" = %item.id,
        "work.team" = %item.team,
        "work.variant" = %item.variant,
        "work.trial" = item.trial,
        "work.outcome" = tracing::field::Empty,
        "work.attempts" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, outcome: OutcomeKind, attempts: u32) {
    span.record("work.outcome", tracing::field::display(outcome));
    span.record("work.attempts", attempts);
}
