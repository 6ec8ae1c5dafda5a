//! Automatic retention and cleanup of the probe log.
//!
//! Probe results older than the configured window (7 days by default) are
//! deleted. Cleanup runs as a periodic job, daily by default.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RetentionConfig;
use crate::database::Database;
use crate::monitoring::PeriodicJob;

/// Retention policy for the probe log
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep probe results
    pub probe_result_days: u32,
    /// Time between cleanup runs
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self { probe_result_days: config.probe_result_days, interval: Duration::from_secs(config.interval_secs) }
    }
}

impl RetentionPolicy {
    fn probe_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.probe_result_days))
    }
}

/// Cleanup manager for expired probe results
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    /// Create a new retention cleanup manager
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Delete probe results past the retention window
    pub async fn cleanup_expired_results(&self) -> Result<u64> {
        let cutoff = chrono::Utc::now() - self.policy.probe_retention();
        debug!(
            "Cleaning up probe results older than {} days (cutoff: {})",
            self.policy.probe_result_days, cutoff
        );

        let deleted = self.database.delete_probe_results_before(cutoff).await?;
        info!("Retention cleanup completed: {} probe results deleted", deleted);

        Ok(deleted)
    }
}

#[async_trait::async_trait]
impl PeriodicJob for RetentionCleanup {
    fn name(&self) -> &'static str {
        "retention-cleanup"
    }

    async fn run_once(&self) -> Result<()> {
        self.cleanup_expired_results().await.map(|_| ())
    }

    fn next_delay(&self) -> Duration {
        self.policy.interval
    }

    fn error_backoff(&self) -> Duration {
        self.policy.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.probe_result_days, 7);
        assert_eq!(policy.interval, Duration::from_secs(24 * 3600));
        assert_eq!(policy.probe_retention(), chrono::Duration::days(7));
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetentionConfig { probe_result_days: 14, interval_secs: 600 };
        let policy = RetentionPolicy::from(&config);
        assert_eq!(policy.probe_retention(), chrono::Duration::days(14));
        assert_eq!(policy.interval, Duration::from_secs(600));
    }
}
