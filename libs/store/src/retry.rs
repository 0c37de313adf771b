//! Bounded retry with exponential backoff.
//!
//! One policy type covers the three retry sites the system has: durable
//! publish, startup dependency connects, and the client-side reconnect
//! contract. Exhaustion is a typed failure, not a panic.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Attempt budget and delay curve for one retry site.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Durable append / cache write retries behind the event publisher.
    pub const fn publish() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Startup dependency connects. A process must not serve traffic until
    /// these succeed, and must exit with a typed failure when they don't.
    pub const fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    /// The client-side reconnect contract: base 1s doubling to a 10s
    /// ceiling, finite budget. Servers never reconnect clients; this policy
    /// is published so client implementors and tests share the constants.
    pub const fn reconnect() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Delay before retry number `attempt` (zero-based): initial × 2^attempt,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// All attempts failed; carries the final error and the attempt count.
#[derive(Debug, Error)]
#[error("{label} failed after {attempts} attempts: {last}")]
pub struct RetryExhausted<E: Display + Debug> {
    pub label: &'static str,
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds or the policy's attempt budget is spent.
pub async fn retry<T, E, F, Fut>(
    policy: &BackoffPolicy,
    label: &'static str,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + Debug,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(RetryExhausted {
                        label,
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(label, attempt, ?delay, error = %err, "retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = BackoffPolicy {
            max_attempts: 8,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(6), Duration::from_secs(5));
        assert_eq!(policy.delay_for(30), Duration::from_secs(5));
    }

    #[test]
    fn reconnect_policy_matches_contract() {
        let policy = BackoffPolicy::reconnect();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted<&str>> =
            retry(&fast_policy(5), "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("nope")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_typed() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryExhausted<&str>> =
            retry(&fast_policy(3), "doomed", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still broken") }
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "still broken");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
