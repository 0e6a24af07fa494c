use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;

/// Where a tick's `ServiceMap` is written and announced. Object-safe so the
/// pipeline can run against an HTTP-backed KV store in production and an
/// in-memory fake in tests, matching the `PolicyStore` trait's shape.
#[async_trait]
pub trait KvPublisher: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), DiscoveryError>;
    async fn notify(&self, channel: &str) -> Result<(), DiscoveryError>;
}

/// Delay ladder lifted straight from `wait_for_operation`'s GCP operation
/// poll: 1s, 2s, 4s, 8s, 16s, capped at 5 attempts total.
const DELAYS_SECS: [u64; 5] = [1, 2, 4, 8, 16];

/// Publishes to an HTTP KV service: `PUT {base}/kv/{key}` for the document,
/// `POST {base}/notify/{channel}` with a literal `"updated"` body to wake
/// subscribers.
pub struct HttpKvPublisher {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl HttpKvPublisher {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into(), auth_token: auth_token.into() }
    }

    async fn with_retry<F, Fut>(&self, description: &str, op: F) -> Result<(), DiscoveryError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), reqwest::Error>>,
    {
        let mut last_error = None;
        for (attempt, delay) in DELAYS_SECS.iter().enumerate() {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt = attempt + 1, %description, error = %e, "publish attempt failed, retrying");
                    last_error = Some(e);
                    tokio::time::sleep(Duration::from_secs(*delay)).await;
                }
            }
        }
        Err(DiscoveryError::PublishFailed(format!(
            "{description} failed after {} attempts: {}",
            DELAYS_SECS.len(),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[async_trait]
impl KvPublisher for HttpKvPublisher {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), DiscoveryError> {
        let url = format!("{}/kv/{key}", self.base_url);
        debug!(url, "publishing service map");
        self.with_retry("kv put", || async {
            self.client.put(&url).bearer_auth(&self.auth_token).body(value.clone()).send().await?.error_for_status()?;
            Ok(())
        })
        .await
    }

    async fn notify(&self, channel: &str) -> Result<(), DiscoveryError> {
        let url = format!("{}/notify/{channel}", self.base_url);
        self.with_retry("notify", || async {
            self.client.post(&url).bearer_auth(&self.auth_token).body("updated").send().await?.error_for_status()?;
            Ok(())
        })
        .await?;
        info!(channel, "notified subscribers of a new service map");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailThenSucceed {
        calls: AtomicUsize,
        fail_for: usize,
    }

    #[async_trait]
    impl KvPublisher for Arc<FailThenSucceed> {
        async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<(), DiscoveryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_for {
                return Err(DiscoveryError::PublishFailed("simulated".into()));
            }
            Ok(())
        }

        async fn notify(&self, _channel: &str) -> Result<(), DiscoveryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fake_publisher_tracks_call_count() {
        let publisher = Arc::new(FailThenSucceed { calls: AtomicUsize::new(0), fail_for: 1 });
        assert!(publisher.put("svc", vec![1, 2, 3]).await.is_err());
        assert!(publisher.put("svc", vec![1, 2, 3]).await.is_ok());
    }
}
