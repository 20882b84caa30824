//! Metric instruments.
//!
//! Created from the `"promptq"` meter on the globally registered
//! `MeterProvider`. Without an OTLP endpoint the global provider is a
//! no-op and recording costs nothing.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

fn meter() -> Meter {
    opentelemetry::global::meter("promptq")
}

/// Counter: planner create attempts.
/// Labels: `result` ("created" | "duplicate").
pub fn work_planned() -> Counter<u64> {
    meter()
        .u64_counter("promptq.work.planned")
        .with_description("Work items submitted to the store by the planner")
        .build()
}

/// Counter: completion flag transitions.
/// Labels: `outcome` ("success" | "empty" | "fatal" | "exhausted").
pub fn work_completed() -> Counter<u64> {
    meter()
        .u64_counter("promptq.work.completed")
        .with_description("Work items marked completed")
        .build()
}

/// Counter: transient failures retried in place.
pub fn generation_retries() -> Counter<u64> {
    meter()
        .u64_counter("promptq.generation.retries")
        .with_description("Generation calls retried after a transient failure")
        .build()
}

/// Histogram: single generation call latency.
/// Labels: `result` ("ok" | "transient" | "fatal").
pub fn generation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("promptq.generation.duration_ms")
        .with_description("Generation call duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Up-down counter: generation calls currently in flight.
pub fn pool_in_flight() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("promptq.pool.in_flight")
        .with_description("Work items currently held by a worker")
        .build()
}
