//! Retry with capped exponential backoff

use std::time::Duration;

/// Errors that can tell whether another attempt might succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(240),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `attempt_fn` until it succeeds, fails permanently, or attempts run out.
///
/// `attempt_fn` receives the 1-based attempt number. The last error is
/// returned on exhaustion.
pub fn retry_with_backoff<T, E>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match attempt_fn(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max && e.is_retryable() => {
                let delay = policy.delay(attempt);
                log::debug!("{label}: attempt {attempt}/{max} failed: {e}, retrying in {delay:?}");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                log::debug!("{label}: giving up after {attempt} attempt(s): {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(1), Duration::from_secs(1));
        assert_eq!(p.delay(2), Duration::from_secs(2));
        assert_eq!(p.delay(4), Duration::from_secs(8));
        assert_eq!(p.delay(20), Duration::from_secs(240));
        assert_eq!(p.delay(64), Duration::from_secs(240));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let out = retry_with_backoff("t", &fast(5), |n| {
            calls += 1;
            if n < 3 { Err(Flaky(true)) } else { Ok(n) }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_error_not_retried() {
        let mut calls = 0;
        let out: Result<(), _> = retry_with_backoff("t", &fast(5), |_| {
            calls += 1;
            Err(Flaky(false))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let mut calls = 0;
        let out: Result<(), _> = retry_with_backoff("t", &fast(3), |_| {
            calls += 1;
            Err(Flaky(true))
        });
        assert!(out.is_err());
        assert_eq!(calls, 3);
    }
}
