//! Integration tests for telemetry initialization and span helpers.

use chrono::Utc;
use promptq::model::{OutcomeKind, WorkId, WorkItem};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // init returns Err, which is acceptable here.
    let config = promptq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "promptq-test".to_string(),
        default_level: "debug".to_string(),
    };
    if let Ok(guard) = promptq::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn genai_chat_span_creates_and_records_chars() {
    let span = promptq::telemetry::genai::start_chat_span("gpt-3.5-turbo", "openai");
    promptq::telemetry::genai::record_response_chars(&span, 120);
}

#[test]
fn item_span_creates_and_records_outcome() {
    let now = Utc::now();
    let item = WorkItem {
        id: WorkId::derive("final", "teamA", "A", 1),
        team: "teamA".into(),
        variant: "A".into(),
        prompt: "draw \"A\"".into(),
        trial: 1,
        output_dir: "competition/teamA/raw/A".into(),
        completed: false,
        outcome: None,
        detail: None,
        attempts: 0,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    let span = promptq::telemetry::work::start_item_span(&item);
    promptq::telemetry::work::record_outcome(&span, OutcomeKind::Success, 2);
}

#[test]
fn metric_instruments_accept_records() {
    use opentelemetry::KeyValue;
    use promptq::telemetry::metrics;

    metrics::work_planned().add(1, &[KeyValue::new("result", "created")]);
    metrics::generation_retries().add(1, &[]);
    metrics::generation_duration_ms().record(12.5, &[KeyValue::new("result", "ok")]);
    metrics::pool_in_flight().add(1, &[]);
    metrics::pool_in_flight().add(-1, &[]);
}
