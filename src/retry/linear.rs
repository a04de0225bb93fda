use super::RetryPolicy;
use std::time::Duration;

use crate::error::BeaconError;

/// 线性退避重试策略
///
/// 第 n 次失败后等待 `step * n`，远程调用的默认策略（step 为 2 秒时
/// 退避序列为 2s、4s、6s …）。
pub struct LinearBackoffPolicy {
    max_attempts: usize,
    step: Duration,
}

impl LinearBackoffPolicy {
    pub fn new(max_attempts: usize, step: Duration) -> Self {
        Self { max_attempts, step }
    }
}

impl Default for LinearBackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl RetryPolicy for LinearBackoffPolicy {
    fn should_retry(&self, attempt: usize, error: &BeaconError) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }

    fn backoff_duration(&self, attempt: usize) -> Duration {
        self.step * attempt.max(1) as u32
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_sequence() {
        let policy = LinearBackoffPolicy::default();
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_duration(3), Duration::from_secs(6));
    }

    #[test]
    fn test_should_retry_respects_attempts_and_kind() {
        let policy = LinearBackoffPolicy::new(3, Duration::from_secs(2));
        let transient = BeaconError::registry("unreachable");
        let permanent = BeaconError::settings("bad endpoints");

        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient));
        assert!(!policy.should_retry(1, &permanent));
    }
}
