use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use super::scheduler::PeriodicJob;
use crate::config::ReaperConfig;
use crate::database::Database;

/// Demotes active nodes whose heartbeats have gone stale
pub struct LivenessReaper {
    database: Arc<dyn Database>,
    config: ReaperConfig,
}

impl LivenessReaper {
    pub fn new(database: Arc<dyn Database>, config: ReaperConfig) -> Self {
        Self { database, config }
    }

    /// Mark stale nodes inactive; returns the demoted node ids
    pub async fn reap(&self) -> Result<Vec<String>> {
        let cutoff = Utc::now() - self.config.stale_after();
        let demoted = self.database.demote_stale_nodes(cutoff).await?;

        if demoted.is_empty() {
            debug!("No stale nodes");
        } else {
            info!(count = demoted.len(), nodes = ?demoted, "Marked stale nodes inactive");
        }

        Ok(demoted)
    }
}

#[async_trait::async_trait]
impl PeriodicJob for LivenessReaper {
    fn name(&self) -> &'static str {
        "liveness-reaper"
    }

    async fn run_once(&self) -> Result<()> {
        self.reap().await.map(|_| ())
    }

    fn next_delay(&self) -> Duration {
        self.config.interval()
    }

    fn error_backoff(&self) -> Duration {
        self.config.interval()
    }

    fn initial_delay(&self) -> Duration {
        self.config.interval()
    }
}
