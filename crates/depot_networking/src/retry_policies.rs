//! Reexports the trait [`RetryPolicy`] from the `retry_policies` crate and
//! provides the policy depot uses for downloads, [`LinearBackoff`].
//!
//! Despite what the name "backoff" suggests, the delay grows linearly with
//! the attempt number (`base * attempt`) and is capped at a ceiling.

pub use retry_policies::{RetryDecision, RetryPolicy};
use std::time::{Duration, SystemTime};

/// Waits `base_delay * n` before the `n`-th retry, never longer than
/// `max_delay`, and gives up after `max_retries` retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
}

impl LinearBackoff {
    /// Constructs a new policy.
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// The number of retries this policy allows.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

impl RetryPolicy for LinearBackoff {
    fn should_retry(&self, _request_start_time: SystemTime, n_past_retries: u32) -> RetryDecision {
        if n_past_retries >= self.max_retries {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry {
            execute_after: SystemTime::now() + self.delay_for_attempt(n_past_retries + 1),
        }
    }
}
