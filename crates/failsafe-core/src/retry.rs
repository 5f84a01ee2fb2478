//! Bounded retry with a wall-clock timeout on every attempt.
//!
//! A stuck call is cut off by `attempt_timeout` and counted as a failed
//! attempt; it never blocks the caller beyond
//! `max_attempts * attempt_timeout` plus the delays in between.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Clock;

/// How many times to try, how long each try may take, and how long to
/// wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Multiplier applied to the delay after each failure (1 = fixed delay).
    pub backoff_factor: u32,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Wall-clock limit for a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_factor: 1,
            max_delay: delay,
            attempt_timeout,
        }
    }

    /// Switch to exponential backoff capped at `max_delay`.
    pub fn with_backoff(mut self, factor: u32, max_delay: Duration) -> Self {
        self.backoff_factor = factor.max(1);
        self.max_delay = max_delay.max(self.delay);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff_factor.saturating_pow(exponent);
        self.delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Why a single attempt did not succeed.
#[derive(Debug)]
pub enum AttemptFailure<E> {
    TimedOut(Duration),
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::TimedOut(after) => write!(f, "timed out after {after:?}"),
            AttemptFailure::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// A successful value and the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// All attempts failed.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: AttemptFailure<E>,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
///
/// `op` receives the 1-based attempt number. Delays go through `clock`,
/// the per-attempt timeout through tokio.
pub async fn retry_with_timeout<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    label: &str,
    mut op: F,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let failure = match tokio::time::timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(%label, attempt, "succeeded after retry");
                }
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                });
            }
            Ok(Err(e)) => AttemptFailure::Failed(e),
            Err(_) => AttemptFailure::TimedOut(policy.attempt_timeout),
        };

        warn!(%label, attempt, max_attempts, error = %failure, "attempt failed");

        if attempt >= max_attempts {
            return Err(RetryError {
                attempts: attempt,
                last: failure,
            });
        }

        clock.sleep(policy.delay_after(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{elapsed_between, ManualClock};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn stops_after_first_success() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5), Duration::from_secs(1));

        let outcome = retry_with_timeout(&policy, &clock, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>("done") }
        })
        .await
        .unwrap();

        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_failure_uses_exactly_max_attempts() {
        let clock = clock();
        let start = clock.now();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5), Duration::from_secs(1));

        let err = retry_with_timeout(&policy, &clock, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("storage unreachable".to_string()) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err.last, AttemptFailure::Failed(_)));
        // Two delays: no sleep after the last attempt.
        assert_eq!(elapsed_between(start, clock.now()), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn hanging_attempt_is_cut_off_by_timeout() {
        let clock = clock();
        let policy = RetryPolicy::fixed(2, Duration::ZERO, Duration::from_millis(20));

        let started = std::time::Instant::now();
        let err = retry_with_timeout(&policy, &clock, "hang", |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), String>(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert!(matches!(err.last, AttemptFailure::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn recovers_on_later_attempt() {
        let clock = clock();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1), Duration::from_secs(1));

        let outcome = retry_with_timeout(&policy, &clock, "flaky", |attempt| async move {
            if attempt < 3 {
                Err("not yet".to_string())
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.value, 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1), Duration::from_secs(1))
            .with_backoff(2, Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
    }
}
