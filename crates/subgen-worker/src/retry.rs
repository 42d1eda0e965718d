//! Internal backoff for the model adapter.
//!
//! Only faults classified `TransientIo` are retried here; quota and auth
//! faults surface immediately so the scheduler can apply their own
//! policies, and these internal retries never consume a pipeline
//! attempt.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use subgen_models::FaultKind;

use crate::error::WorkerResult;

/// Backoff shape for internal transient retries: capped doubling with
/// jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial call
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry
    pub base_delay: Duration,
    /// Delay ceiling, before jitter
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry, plus up to 25% jitter so
    /// synchronized retries spread out.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let capped = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        let jitter_ms = (capped.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::random_range(0..=jitter_ms))
    }
}

/// Run `operation`, retrying while it fails with a `TransientIo` fault.
///
/// Every other fault kind belongs to the scheduler's policy table and is
/// returned untouched on the first occurrence.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> WorkerResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = WorkerResult<T>>,
{
    let mut retry = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e)
                if e.fault_kind() == FaultKind::TransientIo
                    && retry < policy.max_retries =>
            {
                retry += 1;
                let delay = policy.backoff_delay(retry);
                debug!(
                    operation = operation_name,
                    retry,
                    ?delay,
                    "Transient fault, backing off: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff_delay(1) >= Duration::from_secs(2));
        // Cap plus at most 25% jitter.
        assert!(policy.backoff_delay(10) <= Duration::from_millis(37_500));
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&fast(), "generate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_faults_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&fast(), "generate", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WorkerError::model_failed("flapped"))
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
    async fn test_quota_fault_surfaces_at_once() {
        let calls = AtomicU32::new(0);
        let result: WorkerResult<()> = retry_transient(&fast(), "generate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WorkerError::QuotaExhausted("429".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(WorkerError::QuotaExhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_fault_surfaces_at_once() {
        let calls = AtomicU32::new(0);
        let result: WorkerResult<()> = retry_transient(&fast(), "generate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WorkerError::AuthFailed("403".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(WorkerError::AuthFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: WorkerResult<()> = retry_transient(&fast(), "generate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WorkerError::model_failed("still flapping")) }
        })
        .await;
        assert!(result.is_err());
        // Initial call plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
