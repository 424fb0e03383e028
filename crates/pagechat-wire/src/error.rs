//! Error types for pagechat-wire

use thiserror::Error;

/// Result type alias using pagechat-wire Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    /// Reading the response body failed mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,
}

impl Error {
    /// Create an API error from a status code and response body
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Transport(_) => true,
            Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_server_errors() {
        assert!(Error::api(500, "internal").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(Error::api(429, "slow down").is_retryable());
    }

    #[test]
    fn test_not_retryable_client_errors() {
        assert!(!Error::api(400, "bad request").is_retryable());
        assert!(!Error::api(401, "unauthorized").is_retryable());
        assert!(!Error::api(404, "no such index").is_retryable());
    }

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::Transport("connection reset".into()).is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::InvalidConfig("empty base url".into()).is_retryable());
    }

    #[test]
    fn test_api_error_display() {
        let e = Error::api(502, "bad gateway");
        assert_eq!(e.to_string(), "API error: bad gateway (status: 502)");
    }
}
