//! Bounded retry policy shared by hardware transactions.
//!
//! Waits block the calling thread: the bench runs a single logical task and
//! the bus permits only one in-flight transaction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default attempts per phase.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default wait between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How many times to attempt an operation and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts (not additional retries). Zero means the operation is
    /// never attempted and fails immediately.
    pub attempts: u32,

    /// Wait between consecutive attempts; never applied after the last one.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Result of driving an operation through a [`RetryPolicy`].
#[derive(Debug)]
pub enum Attempted<T, E> {
    /// Succeeded on attempt `attempts` (1-based)
    Succeeded {
        /// Value produced by the successful attempt
        value: T,
        /// Attempts used
        attempts: u32,
    },
    /// Every attempt failed with a retryable error
    Exhausted {
        /// Attempts used
        attempts: u32,
        /// Error from the last attempt, if any attempt was made
        last_error: Option<E>,
    },
}

/// Per-attempt verdict returned by the operation closure.
#[derive(Debug)]
pub enum Verdict<T, E, F> {
    /// Done
    Done(T),
    /// Transient failure; try again if attempts remain
    Retry(E),
    /// Non-retryable fault; stop immediately
    Abort(F),
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `op` until it reports [`Verdict::Done`], a non-retryable
    /// [`Verdict::Abort`], or the attempt budget is spent.
    ///
    /// `on_retry` is invoked after each failed attempt with the 1-based
    /// attempt number, before any wait.
    pub fn run<T, E, F>(
        &self,
        mut op: impl FnMut(u32) -> Verdict<T, E, F>,
        mut on_retry: impl FnMut(u32, &E),
    ) -> Result<Attempted<T, E>, F> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match op(attempt) {
                Verdict::Done(value) => {
                    return Ok(Attempted::Succeeded {
                        value,
                        attempts: attempt,
                    })
                }
                Verdict::Abort(fault) => return Err(fault),
                Verdict::Retry(err) => {
                    on_retry(attempt, &err);
                    last_error = Some(err);
                    if attempt < self.attempts && !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }

        Ok(Attempted::Exhausted {
            attempts: self.attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Outcome = Result<Attempted<u32, &'static str>, &'static str>;

    #[test]
    fn test_succeeds_on_later_attempt() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let mut retried = Vec::new();

        let outcome: Outcome = policy.run(
            |n| {
                if n < 3 {
                    Verdict::Retry("busy")
                } else {
                    Verdict::Done(n * 10)
                }
            },
            |n, _| retried.push(n),
        );

        match outcome {
            Ok(Attempted::Succeeded { value, attempts }) => {
                assert_eq!(value, 30);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(retried, vec![1, 2]);
    }

    #[test]
    fn test_exhausts_exact_budget() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;

        let outcome: Outcome = policy.run(
            |_| {
                calls += 1;
                Verdict::Retry("noise")
            },
            |_, _| {},
        );

        assert_eq!(calls, 3);
        assert!(matches!(
            outcome,
            Ok(Attempted::Exhausted { attempts: 3, last_error: Some("noise") })
        ));
    }

    #[test]
    fn test_abort_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;

        let outcome: Outcome = policy.run(
            |_| {
                calls += 1;
                Verdict::Abort("bug")
            },
            |_, _| {},
        );

        assert_eq!(calls, 1);
        assert!(matches!(outcome, Err("bug")));
    }

    #[test]
    fn test_zero_attempts_never_calls() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let mut calls = 0;

        let outcome: Outcome = policy.run(
            |_| {
                calls += 1;
                Verdict::Done(1)
            },
            |_, _| {},
        );

        assert_eq!(calls, 0);
        assert!(matches!(
            outcome,
            Ok(Attempted::Exhausted { attempts: 0, last_error: None })
        ));
    }

    #[test]
    fn test_policy_deserializes_humantime() {
        let policy: RetryPolicy = toml::from_str("attempts = 3\ndelay = \"250ms\"").unwrap();
        assert_eq!(policy, RetryPolicy::new(3, Duration::from_millis(250)));
    }
}
