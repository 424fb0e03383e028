//! Transport abstraction for opening response streams

use std::time::Duration;

use async_trait::async_trait;
use pagechat_wire::{BackendClient, ByteChunkStream, Error, ExchangeRequest, Result};
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Opens the response stream for an exchange
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the raw body stream
    async fn open(&self, request: &ExchangeRequest, cancel: CancellationToken) -> Result<ByteChunkStream>;
}

/// HTTP transport against the document assistant backend
pub struct HttpTransport {
    client: BackendClient,
    retry_config: RetryConfig,
}

impl HttpTransport {
    /// Create a transport for a backend base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: BackendClient::new(base_url)?,
            retry_config: RetryConfig::default(),
        })
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &ExchangeRequest, cancel: CancellationToken) -> Result<ByteChunkStream> {
        // Only opening the stream is retried; once bytes flow, a failure
        // belongs to the exchange.
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }

            match self.client.open(request).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < self.retry_config.max_retries && e.is_retryable() => {
                    let delay = self.retry_config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Aborted),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_http_transport_rejects_empty_url() {
        assert!(matches!(HttpTransport::new(""), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_open_is_aborted() {
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ExchangeRequest::summarize("doc.pdf", &pagechat_wire::Credentials::new("k"));
        let result = transport.open(&request, cancel).await;
        assert!(matches!(result, Err(Error::Aborted)));
    }
}
