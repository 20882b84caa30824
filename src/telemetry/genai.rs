//! GenAI semantic convention span helpers for generation calls.
//!
//! Fields follow the OpenTelemetry GenAI conventions:
//! - `gen_ai.operation.name`
//! - `gen_ai.request.model`
//! - `gen_ai.provider.name`

use tracing::Span;

/// Start a span for one chat completion request.
///
/// `promptq.response.chars` is declared empty and filled by
/// [`record_response_chars`] once the response arrives.
pub fn start_chat_span(model: &str, provider: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
        "promptq.response.chars" = tracing::field::Empty,
    )
}

pub fn record_response_chars(span: &Span, chars: usize) {
    span.record("promptq.response.chars", chars as u64);
}
