//! Bounded reconnect scheduling policy.
//!
//! The delay before the nth retry grows linearly with the attempt number
//! (`base_delay × n`). The attempt counter itself is owned by the stream
//! session and is reset only by a successful open, so the policy stays a
//! pure decision function.

use std::time::Duration;

/// Default delay base between reconnect attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default bound on scheduled reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Policy controlling whether and when a reconnect attempt is scheduled.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Delay base multiplied by the attempt number.
    pub base_delay: Duration,
    /// Maximum number of retries scheduled per connection episode.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Outcome of consulting the policy after a transport failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Schedule retry number `attempt` after `delay`.
    Retry {
        /// 1-based attempt number to record.
        attempt: u32,
        /// Delay to wait before reconnecting.
        delay: Duration,
    },
    /// The retry budget is spent; nothing is scheduled.
    Exhausted,
}

impl ReconnectPolicy {
    /// Computes the delay applied before the given 1-based retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Decides the next step given how many retries were already scheduled
    /// since the last successful open.
    pub fn decide(&self, attempts_so_far: u32) -> RetryDecision {
        if attempts_so_far >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        let attempt = attempts_so_far + 1;
        RetryDecision::Retry {
            attempt,
            delay: self.delay_for_attempt(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ReconnectPolicy, RetryDecision};

    #[test]
    fn delay_grows_linearly_with_attempt_number() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        };

        for attempt in 1..=5 {
            assert_eq!(
                policy.delay_for_attempt(attempt),
                Duration::from_millis(1000 * u64::from(attempt))
            );
        }
    }

    #[test]
    fn decide_uses_the_incremented_count_as_multiplier() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_attempts: 5,
        };

        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(100),
            }
        );
        assert_eq!(
            policy.decide(3),
            RetryDecision::Retry {
                attempt: 4,
                delay: Duration::from_millis(400),
            }
        );
    }

    #[test]
    fn decide_exhausts_at_the_attempt_bound() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_attempts: 2,
        };

        assert!(matches!(policy.decide(0), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(1), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(2), RetryDecision::Exhausted);
        assert_eq!(policy.decide(3), RetryDecision::Exhausted);
    }

    #[test]
    fn default_policy_matches_documented_bounds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }
}
