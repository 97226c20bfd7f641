//! Races a call against a timer (spec.md §4.15)

use std::future::Future;
use std::time::Duration;

use crate::error::{ErrorKind, LibraryError};
use crate::resilience::retry::AbortSignal;

/// Races `fut` against `duration`; raises **operation-timeout** on expiry.
/// An abort signal cancels both branches with *retry-aborted*.
pub async fn with_timeout<T>(
    duration: Duration,
    abort: Option<AbortSignal>,
    fut: impl Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    match abort {
        Some(mut signal) => {
            tokio::select! {
                res = fut => res,
                _ = tokio::time::sleep(duration) => {
                    Err(LibraryError::new(ErrorKind::OperationTimeout, format!("operation exceeded {duration:?}")))
                }
                _ = signal.aborted() => Err(LibraryError::new(ErrorKind::RetryAborted, "operation aborted")),
            }
        }
        None => {
            tokio::select! {
                res = fut => res,
                _ = tokio::time::sleep(duration) => {
                    Err(LibraryError::new(ErrorKind::OperationTimeout, format!("operation exceeded {duration:?}")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_call_succeeds() {
        let result = with_timeout(Duration::from_millis(50), None, async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let result: crate::Result<()> = with_timeout(Duration::from_millis(5), None, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::OperationTimeout);
    }
}
