//! Capped exponential backoff for blob operations.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Backoff policy: initial delay doubled per attempt up to a cap, with a
/// bounded number of tries and a per-call timeout.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total tries, including the first
    pub max_tries: u32,
    /// Delay before the second try
    pub base_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
    /// Per-call timeout
    pub op_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            op_timeout: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Run `operation` under the per-call timeout, retrying transient
    /// failures. Fatal faults (auth, config) are raised immediately.
    pub async fn run<F, Fut, T>(&self, name: &str, operation: F) -> StorageResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(self.op_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(self.op_timeout.as_secs())),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if attempt + 1 < self.max_tries => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(
                        "{} attempt {} failed, retrying in {:?}: {}",
                        name, attempt, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_tries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            op_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_delay_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("put", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StorageError::upload_failed("flapped"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = fast_policy()
            .run("put", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::AccessDenied("no".to_string())) }
            })
            .await;
        assert!(matches!(result, Err(StorageError::AccessDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_tries() {
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = fast_policy()
            .run("put", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::upload_failed("still flapping")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
