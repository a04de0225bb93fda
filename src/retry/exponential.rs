use super::RetryPolicy;
use std::time::Duration;

use crate::error::BeaconError;

/// 指数退避重试策略
pub struct ExponentialBackoffPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, attempt: usize, error: &BeaconError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        // 只对瞬时错误进行重试
        error.is_transient()
    }

    fn backoff_duration(&self, attempt: usize) -> Duration {
        let delay_ms = self.base_delay.as_millis() as u64 * (1 << attempt.min(10));
        let delay = Duration::from_millis(delay_ms);
        delay.min(self.max_delay)
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let policy = ExponentialBackoffPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_secs(2),
        );
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(2));
    }
}
