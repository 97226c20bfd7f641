//! Retry with exponential backoff + jitter (spec.md §4.15)

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Concrete (non-generic) error type so it composes into [`crate::LibraryError`]
/// the same way every other submodule error does.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("retry exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, #[source] source: Box<dyn std::error::Error + Send + Sync> },
    #[error("retry aborted")]
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Symmetric jitter factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// `base · mult^(attempt-1)` capped by `maxDelay`, spec.md §4.15.
    /// `attempt` is 1-indexed. Jitter is derived deterministically from the
    /// attempt number so retry delay is reproducible in tests, rather than
    /// pulling from a global RNG.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter_seed = ((attempt as u64).wrapping_mul(2654435761) % 1000) as f64 / 1000.0;
        let jitter_span = capped * self.jitter;
        let jittered = capped - jitter_span + jitter_seed * 2.0 * jitter_span;
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// An abort signal — clone cheaply, fire once from anywhere.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, AbortSignal { rx })
    }

    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn aborted(&mut self) {
        let _ = self.rx.wait_for(|v| *v).await;
    }
}

/// Runs `f` until it succeeds, `should_retry` rejects the error, attempts are
/// exhausted, or `abort` fires. `f` is re-invoked fresh on each attempt.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut abort: Option<AbortSignal>,
    should_retry: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, RetryError>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if let Some(signal) = &abort {
            if signal.is_aborted() {
                return Err(RetryError::Aborted);
            }
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= policy.max_attempts || !should_retry(&e) {
                    return Err(RetryError::Exhausted { attempts: attempt, source: Box::new(e) });
                }
                let delay = policy.delay_for(attempt);
                match abort.as_mut() {
                    Some(signal) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = signal.aborted() => return Err(RetryError::Aborted),
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("test error: {0}")]
    struct TestError(&'static str);

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let policy = RetryPolicy::default();
        let result: Result<u32, RetryError> =
            retry(&policy, None, |_| true, || async { Ok::<u32, TestError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let policy = RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1), ..Default::default() };
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError> = retry(
            &policy,
            None,
            |_| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, TestError>(TestError("boom")) }
            },
        )
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn should_retry_false_stops_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError> = retry(
            &policy,
            None,
            |_| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, TestError>(TestError("permanent")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_signal_cancels_retry() {
        let policy = RetryPolicy { max_attempts: 10, base_delay: Duration::from_secs(30), ..Default::default() };
        let (handle, signal) = AbortHandle::new();
        handle.abort();
        let result: Result<u32, RetryError> =
            retry(&policy, Some(signal), |_| true, || async { Err::<u32, TestError>(TestError("boom")) }).await;
        assert!(matches!(result, Err(RetryError::Aborted)));
    }

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(4), Duration::from_millis(300));
    }
}
