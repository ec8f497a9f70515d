//! Caller-side retry policy for pulls.
//!
//! The manager reports failures without retrying; this policy decides how
//! long a caller keeps trying when the failure is retryable.

use std::time::Duration;

use dockhand_common::config::DockhandConfig;
use dockhand_common::constants::{DEFAULT_PULL_INTERVAL, DEFAULT_PULL_TIMEOUT};

use crate::index::ImageRecord;

/// How long and how often to retry a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Overall deadline measured from the first attempt.
    pub timeout: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Builds a policy from explicit durations.
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// A single attempt and no retries.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            timeout: Duration::MAX,
            interval: Duration::MAX,
        }
    }

    /// Uses the pull timeout and interval from the configuration.
    #[must_use]
    pub const fn from_config(config: &DockhandConfig) -> Self {
        Self::new(config.pull_timeout(), config.pull_interval())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_PULL_TIMEOUT, DEFAULT_PULL_INTERVAL)
    }
}

/// Outcome of a retried pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// The record inserted by the successful attempt.
    pub record: ImageRecord,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_ten_minutes_every_fifteen_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(600));
        assert_eq!(policy.interval, Duration::from_secs(15));
    }

    #[test]
    fn policy_follows_config() {
        let config = DockhandConfig {
            pull_timeout_secs: 60,
            pull_interval_secs: 5,
            ..DockhandConfig::default()
        };
        assert_eq!(
            RetryPolicy::from_config(&config),
            RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(5))
        );
    }
}
