//! Exponential backoff retry for transient chain errors (§7):
//! "transient failures ... are retried with exponential back-off up to a
//! configured attempt count; hard failures ... are fatal to that call."

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ChainError;

const BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Run `f` up to `max_attempts` times, retrying only on
/// [`ChainError::is_retryable`] errors, doubling the delay each time up to
/// `MAX_DELAY`. The first non-retryable error is returned immediately.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    mut f: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "transient chain error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let scaled = BASE_DELAY.saturating_mul(1u32 << attempt.min(10));
    scaled.min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test_op", 5, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ChainError::Transient("rate limited".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ChainError> = with_retry("test_op", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChainError::Transient("still failing".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_abort_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ChainError> = with_retry("test_op", 5, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChainError::Revert {
                reason: "NotWhitelistedResolver".into(),
                retryable: false,
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
