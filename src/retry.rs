use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{AttemptError, CallError};

/// Bounded retry with a fixed wait between attempts.
///
/// Only transport failures and per-call timeouts are retried; a rejection
/// surfaces on the first attempt so the caller can fall back instead of
/// repeating a doomed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Upper bound for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait between attempts. The same for every retry; there is no exponential growth.
    pub fn delay(&self) -> Duration {
        self.backoff
    }

    /// Run `call` until it succeeds, is rejected, or attempts run out.
    pub async fn invoke<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max {
            match timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(call = label, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(AttemptError::Rejected(message))) => {
                    debug!(call = label, attempt, %message, "call rejected");
                    return Err(CallError::Rejected(message));
                }
                Ok(Err(AttemptError::Transport(message))) => last_error = message,
                Err(_) => {
                    last_error = format!("timed out after {}ms", self.call_timeout.as_millis());
                }
            }

            if attempt < max {
                let delay = self.delay();
                warn!(
                    call = label,
                    attempt,
                    max,
                    reason = %last_error,
                    delay_ms = delay.as_millis() as u64,
                    "retrying external call"
                );
                sleep(delay).await;
            }
        }

        Err(CallError::Transient {
            attempts: max,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn succeeds_after_max_minus_one_transient_failures() {
        let policy = fast_policy(3);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = policy
            .invoke("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AttemptError::Transport("connection refused".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_attempts_is_transient_failure() {
        let policy = fast_policy(3);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), _> = policy
            .invoke("down", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Transport("503".into()))
            })
            .await;

        assert_eq!(
            result,
            Err(CallError::Transient {
                attempts: 3,
                message: "503".into()
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let policy = fast_policy(3);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), _> = policy
            .invoke("bad-request", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Rejected("400 bad request".into()))
            })
            .await;

        assert_eq!(result, Err(CallError::Rejected("400 bad request".into())));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_count_as_transient() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
            call_timeout: Duration::from_millis(10),
        };

        let result: Result<(), _> = policy
            .invoke("slow", || async {
                sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        match result {
            Err(CallError::Transient { attempts, message }) => {
                assert_eq!(attempts, 2);
                assert!(message.contains("timed out"));
            }
            other => panic!("expected transient failure, got {other:?}"),
        }
    }

    #[test]
    fn backoff_is_fixed() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(), Duration::from_millis(1000));
    }
}
