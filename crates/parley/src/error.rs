//! Error types for Parley

use thiserror::Error;

/// Main error type for Parley operations
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Missing credentials, unreadable or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeouts, connection failures, broken response bodies
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx status or malformed response body from a provider
    #[error("Provider error: {0}")]
    Provider(String),

    /// The provider answered but nothing usable was left after filtering
    #[error("Empty response: {0}")]
    EmptyResponse(String),

    /// Web search backend errors
    #[error("Search error: {0}")]
    Search(String),

    /// Combinations of options that are not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The consumer of a reply stream went away
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ParleyError {
    /// Build a provider error from a non-success HTTP status and its body
    pub fn status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = body.trim();
        if body.is_empty() {
            ParleyError::Provider(format!("API returned {status}"))
        } else {
            ParleyError::Provider(format!("API returned {status}: {body}"))
        }
    }
}

impl From<reqwest::Error> for ParleyError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            ParleyError::Provider(format!("API returned {status}: {e}"))
        } else if e.is_decode() {
            ParleyError::Provider(format!("Malformed response body: {e}"))
        } else {
            ParleyError::Network(e.to_string())
        }
    }
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;
