// Bounded retry driver
//
// An operation is attempted up to `max_attempts` times. Between attempts the
// executor waits for the next entry of a fixed delay schedule. Both the attempt
// and the wait are abandoned as soon as the cancellation token fires.

pub mod classifier;

pub use classifier::{Classification, DefaultErrorClassifier, ErrorClassifier};

use std::error::Error;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Attempt budget and wait schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first one
    pub max_attempts: u32,

    /// Wait before attempt `i + 2`; the last entry repeats if the list is short
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    /// Four attempts, waiting 1s, 3s and 5s in between
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        RetryPolicy {
            max_attempts,
            delays,
        }
    }

    /// Returns the wait that follows the failed attempt number `index` (0-based)
    pub fn delay_for(&self, index: usize) -> Duration {
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Outcome of an operation that did not succeed
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: Error + 'static,
{
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    #[error(transparent)]
    Permanent(E),
}

impl<E> RetryError<E>
where
    E: Error + 'static,
{
    /// The last error returned by the operation, if it ran at all
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Permanent(err) => Some(err),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, exhausts the policy
/// or `cancel` fires.
///
/// # Arguments
/// * `cancel` - Token aborting the current attempt or wait
/// * `policy` - Attempt budget and delay schedule
/// * `classifier` - Decides whether a failure is worth repeating
/// * `operation` - Produces a fresh future for every attempt
///
/// # Returns
/// * `Ok(T)` - Value of the first successful attempt
/// * `Err(RetryError::Permanent)` - First non-retriable failure, unwrapped
/// * `Err(RetryError::Exhausted)` - Last failure once the budget ran out
/// * `Err(RetryError::Cancelled)` - Cancellation fired first
pub async fn execute<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    classifier: &dyn ErrorClassifier,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = operation() => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if classifier.classify(&err) == Classification::NonRetriable {
            return Err(RetryError::Permanent(err));
        }

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                source: err,
            });
        }

        let delay = policy.delay_for(attempt as usize - 1);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retriable failure, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn always(verdict: Classification) -> impl ErrorClassifier {
        move |_: &(dyn Error + 'static)| verdict
    }

    fn refused() -> io::Error {
        io::Error::from(io::ErrorKind::ConnectionRefused)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = execute(
            &cancel,
            &RetryPolicy::default(),
            &always(Classification::Retriable),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 4, .. })));
        assert_eq!(started.elapsed(), Duration::from_secs(9));

        let message = result.unwrap_err().to_string();
        assert!(message.starts_with("operation failed after 4 attempts"), "{message}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_runs_once() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = execute(
            &cancel,
            &RetryPolicy::default(),
            &always(Classification::NonRetriable),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::Permanent(err)) => assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = execute(
            &cancel,
            &RetryPolicy::default(),
            &DefaultErrorClassifier,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(refused())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        });

        let started = Instant::now();
        let result: Result<(), _> = execute(
            &cancel,
            &RetryPolicy::default(),
            &always(Classification::Retriable),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_operation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<io::Error>> = execute(
            &cancel,
            &RetryPolicy::default(),
            &DefaultErrorClassifier,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delay_schedule_clamps_to_last_entry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(RetryPolicy::new(3, Vec::new()).delay_for(0), Duration::ZERO);
    }
}
