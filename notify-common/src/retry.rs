use std::time;

/// How many times a message is attempted and how long to wait between
/// attempts. The default is a small bounded attempt count with a fixed
/// 5 second delay; a coefficient above 1 turns the delay exponential.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts allowed for one message, first delivery included.
    max_attempts: u32,
    /// Coefficient to multiply backoff_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The delay before the first retry.
    backoff_interval: time::Duration,
    /// The maximum possible delay between retries.
    maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_coefficient: u32,
        backoff_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_coefficient,
            backoff_interval,
            maximum_interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a message that has failed `attempt` times may be retried.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// The delay to wait after failed attempt number `attempt` (1-based).
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let candidate_interval = self.backoff_interval * self.backoff_coefficient.pow(exponent);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_coefficient: 1,
            backoff_interval: time::Duration::from_millis(5000),
            maximum_interval: None,
        }
    }
}
