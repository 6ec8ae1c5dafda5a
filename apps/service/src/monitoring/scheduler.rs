use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One periodic unit of work driven by [`run_periodic`]
#[async_trait::async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Perform one cycle; errors are logged and retried after `error_backoff`
    async fn run_once(&self) -> Result<()>;

    /// Wait before the next cycle after a successful one
    fn next_delay(&self) -> Duration;

    fn error_backoff(&self) -> Duration;

    /// Wait before the first cycle
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Cooperative shutdown flag shared by every loop
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Create the sender that stops every loop and the signal they watch
pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, ShutdownSignal { rx })
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `delay`; returns true if shutdown was requested first
    pub async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => self.is_triggered(),
            changed = self.rx.changed() => {
                // A dropped sender means the owner is gone
                changed.is_err() || *self.rx.borrow()
            }
        }
    }
}

/// Spawn a job loop that runs until shutdown.
///
/// A cycle in progress is never interrupted; shutdown is observed between
/// cycles.
pub fn run_periodic(job: Arc<dyn PeriodicJob>, mut shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let name = job.name();
        info!(job = name, "Starting periodic job");

        let mut delay = job.initial_delay();
        loop {
            if shutdown.sleep_or_shutdown(delay).await {
                break;
            }

            delay = match job.run_once().await {
                Ok(()) => {
                    let next = job.next_delay();
                    debug!(job = name, next_in_secs = next.as_secs(), "Cycle complete");
                    next
                }
                Err(e) => {
                    let backoff = job.error_backoff();
                    warn!(job = name, retry_in_secs = backoff.as_secs(), "Cycle failed: {:#}", e);
                    backoff
                }
            };
        }

        info!(job = name, "Periodic job stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait::async_trait]
    impl PeriodicJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run_once(&self) -> Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && run == 0 {
                anyhow::bail!("first run fails");
            }
            Ok(())
        }

        fn next_delay(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn error_backoff(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_on_cadence_and_backs_off_after_errors() {
        let job = Arc::new(CountingJob { runs: AtomicUsize::new(0), fail_first: true });
        let (tx, shutdown) = shutdown_channel();
        let handle = run_periodic(job.clone(), shutdown);

        // First run fails immediately, retried after the 5s backoff
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);

        // Then the regular 60s cadence applies
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let job = Arc::new(CountingJob { runs: AtomicUsize::new(0), fail_first: false });
        let (tx, shutdown) = shutdown_channel();
        let handle = run_periodic(job.clone(), shutdown);

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut shutdown) = shutdown_channel();
        drop(tx);
        assert!(shutdown.sleep_or_shutdown(Duration::from_secs(3600)).await);
    }
}
