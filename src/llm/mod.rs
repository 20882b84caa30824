//! Generation client capability and the rig-core OpenAI provider.
//!
//! The drain loop only sees [`Generate`]: prompt in, text out, or a
//! [`GenerationError`] already classified as transient or fatal.
//!
//! # Example
//! ```no_run
//! use promptq::llm::{Generate, OpenAiClient};
//! use secrecy::SecretString;
//!
//! # async fn demo() -> promptq::error::Result<()> {
//! let key = SecretString::from("sk-...");
//! let client = OpenAiClient::new(&key, "gpt-3.5-turbo")?;
//! let text = client.generate("draw \"A\"").await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use crate::error;
use crate::telemetry::genai;

/// Whether retrying the same request may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Server-side 500–504 or a connectivity/name-resolution failure.
    Transient,
    /// Anything else, including malformed responses.
    Fatal,
}

/// A failed generation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl GenerationError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            detail: detail.into(),
        }
    }

    /// Build an error from a provider message, classifying it.
    pub fn from_message(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            kind: classify(&detail),
            detail,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Request/response access to the external generative-text service.
///
/// Calls share no session state; the drain loop issues many concurrently.
pub trait Generate: Send + Sync + 'static {
    fn generate(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

const TRANSIENT_STATUS: std::ops::RangeInclusive<u16> = 500..=504;

const CONNECTIVITY_MARKERS: &[&str] = &[
    "getaddrinfo",
    "enotfound",
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "temporary failure in name resolution",
    "connection refused",
    "error trying to connect",
];

/// Classify a provider error message.
///
/// Transient when the message carries a standalone 500–504 status code or
/// names a connectivity/resolution failure. Everything else is fatal.
pub fn classify(detail: &str) -> ErrorKind {
    if status_codes(detail).any(|code| TRANSIENT_STATUS.contains(&code)) {
        return ErrorKind::Transient;
    }

    let lower = detail.to_lowercase();
    if CONNECTIVITY_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorKind::Transient;
    }

    ErrorKind::Fatal
}

/// Standalone three-digit numbers in `text` (not part of a longer number).
fn status_codes(text: &str) -> impl Iterator<Item = u16> + '_ {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 3)
        .filter_map(|run| run.parse().ok())
}

/// OpenAI chat completion client via rig-core.
pub struct OpenAiClient {
    client: rig::providers::openai::Client,
    model: String,
}

impl OpenAiClient {
    /// Create a client from a secret API key.
    ///
    /// # Errors
    /// Returns a fatal [`GenerationError`] if the HTTP client cannot be built.
    pub fn new(api_key: &SecretString, model: impl Into<String>) -> error::Result<Self> {
        let client = rig::providers::openai::Client::new(api_key.expose_secret())
            .map_err(|e| GenerationError::fatal(format!("cannot build OpenAI client: {e}")))?;
        Ok(Self {
            client,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Generate for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let span = genai::start_chat_span(&self.model, "openai");
        let agent = self.client.agent(&self.model).build();
        let prompt = prompt.to_owned();

        let response = async move { agent.prompt(prompt).await }
            .instrument(span.clone())
            .await
            .map_err(|e| GenerationError::from_message(e.to_string()))?;

        genai::record_response_chars(&span, response.chars().count());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_500_to_504_are_transient() {
        for code in 500..=504 {
            let msg = format!("ProviderError: {code} status from upstream");
            assert_eq!(classify(&msg), ErrorKind::Transient, "{msg}");
        }
    }

    #[test]
    fn other_statuses_are_fatal() {
        assert_eq!(classify("HTTP 505 HTTP Version Not Supported"), ErrorKind::Fatal);
        assert_eq!(classify("HTTP 401 Unauthorized"), ErrorKind::Fatal);
        assert_eq!(classify("HTTP 429 Too Many Requests"), ErrorKind::Fatal);
    }

    #[test]
    fn digits_inside_longer_numbers_do_not_match() {
        assert_eq!(classify("request id 15030 rejected"), ErrorKind::Fatal);
        assert_eq!(classify("token count 5021 exceeds limit"), ErrorKind::Fatal);
    }

    #[test]
    fn resolution_failures_are_transient() {
        assert_eq!(
            classify("getaddrinfo ENOTFOUND api.openai.com"),
            ErrorKind::Transient
        );
        assert_eq!(
            classify("error sending request: dns error: failed to lookup address information"),
            ErrorKind::Transient
        );
    }

    #[test]
    fn constructors_set_kind_without_classifying() {
        let err = GenerationError::transient("HTTP 401 Unauthorized");
        assert!(err.is_transient());
        let err = GenerationError::fatal("HTTP 503 Service Unavailable");
        assert!(!err.is_transient());
    }

    #[test]
    fn client_carries_model_name() {
        let key = SecretString::from("sk-test");
        let client = OpenAiClient::new(&key, "gpt-3.5-turbo").unwrap();
        assert_eq!(client.model(), "gpt-3.5-turbo");
    }

    #[test]
    fn generation_errors_convert_into_crate_errors() {
        let err: error::Error = GenerationError::fatal("no choices").into();
        assert!(matches!(err, error::Error::Generation(ref g) if !g.is_transient()));
        assert_eq!(err.to_string(), "no choices");
    }

    #[test]
    fn malformed_response_is_fatal() {
        let err = GenerationError::from_message("JsonError: missing field `choices`");
        assert!(!err.is_transient());
    }
}
