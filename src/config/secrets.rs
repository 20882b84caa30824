//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers don't depend on the crate directly.

pub use secrecy::{ExposeSecret, SecretString};
