//! Startup connection retry for service-to-service channels.
//!
//! Requests are never retried automatically. The only retry happens while a
//! service establishes its channel to a peer at boot, which lets services
//! start in any order.

use std::time::Duration;
use tokio::time::sleep;
use tonic::transport::{Channel, Endpoint};
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;
        Duration::from_millis(backoff_ms)
    }
}

/// Timeouts applied to a peer channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// The gRPC endpoint (e.g. "http://accounts-service:3001").
    pub endpoint: String,
    pub connect_timeout: Duration,
    /// Upper bound for any single call on the channel.
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }

    fn build_endpoint(&self) -> Result<Endpoint, tonic::transport::Error> {
        Ok(Endpoint::from_shared(self.endpoint.clone())?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout))
    }
}

/// Connect to a peer, retrying with exponential backoff until the retry
/// budget is spent.
pub async fn connect_with_retry(
    config: &ChannelConfig,
    peer: &str,
) -> Result<Channel, tonic::transport::Error> {
    let endpoint = config.build_endpoint()?;
    let mut attempt = 0;

    loop {
        match endpoint.connect().await {
            Ok(channel) => {
                info!(
                    peer = peer,
                    endpoint = %config.endpoint,
                    attempt = attempt + 1,
                    "Connected to peer service"
                );
                return Ok(channel);
            }
            Err(e) if attempt >= config.retry.max_retries => {
                warn!(
                    peer = peer,
                    endpoint = %config.endpoint,
                    attempt = attempt + 1,
                    error = %e,
                    "Giving up connecting to peer service"
                );
                return Err(e);
            }
            Err(e) => {
                let backoff = config.retry.backoff_duration(attempt);
                warn!(
                    peer = peer,
                    endpoint = %config.endpoint,
                    attempt = attempt + 1,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "Peer service not reachable, retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Build a channel that connects on first use. Used by tests and by callers
/// that prefer to surface `UNAVAILABLE` per request over blocking startup.
pub fn connect_lazy(config: &ChannelConfig) -> Result<Channel, tonic::transport::Error> {
    Ok(config.build_endpoint()?.connect_lazy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_duration() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_duration(0), Duration::from_millis(200));
        assert_eq!(config.backoff_duration(1), Duration::from_millis(400));
        assert_eq!(config.backoff_duration(2), Duration::from_millis(800));
        assert_eq!(config.backoff_duration(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_budget() {
        let config = ChannelConfig {
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff: Duration::from_millis(1),
                ..Default::default()
            },
            connect_timeout: Duration::from_millis(200),
            ..ChannelConfig::new("http://127.0.0.1:1")
        };
        assert!(connect_with_retry(&config, "nowhere").await.is_err());
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let config = ChannelConfig::new("not a uri");
        assert!(connect_lazy(&config).is_err());
    }
}
