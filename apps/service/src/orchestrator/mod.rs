/// Orchestrator module - hosts the periodic loops of the worker process
///
/// The orchestrator:
/// - Builds the stats collector, spot-check prober, liveness reaper and
///   retention cleanup from configuration
/// - Runs each as an independent periodic job sharing only the database
/// - Stops them cooperatively on SIGINT/SIGTERM with a bounded grace period

pub mod retention;


pub use retention::{RetentionCleanup, RetentionPolicy};

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{Database, DatabaseImpl};
use crate::monitoring::checker::relay_prober;
use crate::monitoring::{
    HttpStatsFetcher, LivenessReaper, PeriodicJob, SpotCheckProber, StatsCollector, ThreadRngJitter,
    run_periodic, shutdown_channel,
};
use crate::pool::LibsqlPool;

/// Worker process: every background loop of the coordinator
pub struct Worker {
    config: Arc<Config>,
    database: Arc<dyn Database>,
}

impl Worker {
    /// Create and run a worker until a termination signal arrives
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let worker = Self::new(config, pool);
        worker.run(wait_for_termination()).await
    }

    /// Create a worker over an already migrated pool
    pub fn new(config: Config, pool: LibsqlPool) -> Self {
        Self { config: Arc::new(config), database: Arc::new(DatabaseImpl::new_from_pool(pool)) }
    }

    /// Build the periodic jobs described by the configuration
    pub fn jobs(&self) -> Result<Vec<Arc<dyn PeriodicJob>>> {
        let config = &self.config;

        let fetcher = Arc::new(HttpStatsFetcher::new(config.collector.request_timeout())?);
        let collector = StatsCollector::new(self.database.clone(), fetcher, config.collector.clone());

        let prober = SpotCheckProber::new(
            self.database.clone(),
            Arc::from(relay_prober(&config.spot_check)),
            Arc::new(ThreadRngJitter),
            config.spot_check.clone(),
        );

        let reaper = LivenessReaper::new(self.database.clone(), config.reaper.clone());
        let retention = RetentionCleanup::new(self.database.clone(), RetentionPolicy::from(&config.retention));

        Ok(vec![
            Arc::new(collector) as Arc<dyn PeriodicJob>,
            Arc::new(prober),
            Arc::new(reaper),
            Arc::new(retention),
        ])
    }

    /// Run every job until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let jobs = self.jobs()?;
        info!(
            jobs = jobs.len(),
            spot_check_method = %self.config.spot_check.method,
            "Worker started"
        );

        run_jobs(jobs, shutdown, Duration::from_secs(self.config.worker.shutdown_grace_secs)).await;
        info!("Worker stopped");
        Ok(())
    }
}

/// Run jobs until `shutdown` resolves, then give them `grace` to finish the
/// current cycle before abandoning them. Returns the number abandoned.
pub async fn run_jobs(jobs: Vec<Arc<dyn PeriodicJob>>, shutdown: impl Future<Output = ()>, grace: Duration) -> usize {
    let (shutdown_tx, signal) = shutdown_channel();
    let mut handles: Vec<_> = jobs.into_iter().map(|job| run_periodic(job, signal.clone())).collect();

    shutdown.await;
    info!(grace_secs = grace.as_secs(), "Shutdown requested; stopping loops");
    // Receivers live in the spawned loops; a send error only means they already exited
    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(grace, futures::future::join_all(handles.iter_mut())).await;
    if drained.is_ok() {
        return 0;
    }

    let mut abandoned = 0;
    for handle in &handles {
        if !handle.is_finished() {
            handle.abort();
            abandoned += 1;
        }
    }
    warn!(abandoned, "Loops did not finish within the grace period; abandoned");
    abandoned
}

/// Resolves on SIGINT, or SIGTERM on unix
pub async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
