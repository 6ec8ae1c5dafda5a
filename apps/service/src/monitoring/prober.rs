use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use super::checker::{RelayProber, relay_endpoint};
use super::scheduler::PeriodicJob;
use super::types::SpotCheckOutcome;
use crate::config::SpotCheckConfig;
use crate::database::Database;
use crate::database::models::{ProbeResult, ProbeType};

/// Source of randomness for spot-check timing and node selection
pub trait Jitter: Send + Sync {
    /// Uniform duration within `[min, max]`
    fn interval(&self, min: Duration, max: Duration) -> Duration;

    /// Uniform index within `0..len`; `len` is never zero
    fn pick(&self, len: usize) -> usize;
}

pub struct ThreadRngJitter;

impl Jitter for ThreadRngJitter {
    fn interval(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let secs = rand::thread_rng().gen_range(min.as_secs()..=max.as_secs());
        Duration::from_secs(secs)
    }

    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Independently verifies one randomly chosen healthy node per cycle
pub struct SpotCheckProber {
    database: Arc<dyn Database>,
    prober: Arc<dyn RelayProber>,
    jitter: Arc<dyn Jitter>,
    config: SpotCheckConfig,
}

impl SpotCheckProber {
    pub fn new(
        database: Arc<dyn Database>,
        prober: Arc<dyn RelayProber>,
        jitter: Arc<dyn Jitter>,
        config: SpotCheckConfig,
    ) -> Self {
        Self { database, prober, jitter, config }
    }

    /// Check one node; `None` when no node is eligible
    pub async fn run_cycle(&self) -> Result<Option<SpotCheckOutcome>> {
        let since = Utc::now() - self.config.healthy_window();
        let pool = self.database.list_recently_healthy_nodes(since).await?;

        if pool.is_empty() {
            debug!("No recently healthy nodes; skipping spot-check");
            return Ok(None);
        }

        let index = self.jitter.pick(pool.len()).min(pool.len() - 1);
        let node = &pool[index];

        let endpoint = relay_endpoint(node, &self.config);
        let endpoint_url = endpoint.as_ref().ok().map(|e| e.url.clone());
        info!(
            node_id = %node.node_id,
            stream_id = %node.stream_id,
            endpoint = endpoint_url.as_deref().unwrap_or("-"),
            candidates = pool.len(),
            "Spot-checking node"
        );

        let verdict = match endpoint {
            Ok(endpoint) => self.prober.probe(&endpoint).await,
            Err(failure) => Err(failure),
        };

        let probe = ProbeResult::new(node, ProbeType::SpotCheck);
        let outcome = match verdict {
            Ok(evidence) => {
                self.database.insert_probe_result(&probe.succeeded(Some(evidence.clone()))).await?;
                info!(node_id = %node.node_id, "Spot-check passed: {}", evidence);
                SpotCheckOutcome {
                    node_id: node.node_id.clone(),
                    stream_id: node.stream_id.clone(),
                    endpoint: endpoint_url,
                    passed: true,
                    detail: evidence,
                }
            }
            Err(failure) => {
                let detail = failure.to_string();
                let flagged = self.database.record_spot_check(&probe.failed(detail.clone()), true).await?;
                if flagged {
                    warn!(node_id = %node.node_id, stream_id = %node.stream_id, "Spot-check failed, node flagged: {}", detail);
                } else {
                    warn!(
                        node_id = %node.node_id,
                        stream_id = %node.stream_id,
                        "Spot-check failed; node left the stream or went inactive meanwhile, not flagged: {}",
                        detail
                    );
                }
                SpotCheckOutcome {
                    node_id: node.node_id.clone(),
                    stream_id: node.stream_id.clone(),
                    endpoint: endpoint_url,
                    passed: false,
                    detail,
                }
            }
        };

        Ok(Some(outcome))
    }

    fn random_interval(&self) -> Duration {
        self.jitter.interval(
            Duration::from_secs(self.config.min_interval_secs),
            Duration::from_secs(self.config.max_interval_secs),
        )
    }
}

#[async_trait::async_trait]
impl PeriodicJob for SpotCheckProber {
    fn name(&self) -> &'static str {
        "spot-check-prober"
    }

    async fn run_once(&self) -> Result<()> {
        self.run_cycle().await.map(|_| ())
    }

    fn next_delay(&self) -> Duration {
        self.random_interval()
    }

    fn error_backoff(&self) -> Duration {
        self.config.error_backoff()
    }

    fn initial_delay(&self) -> Duration {
        self.random_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Node, NodeStatus, Stream};
    use crate::database::testing::create_test_database;
    use crate::heartbeat::{Heartbeat, HeartbeatRegistrar};
    use crate::monitoring::checker::{ProbeFailure, RelayEndpoint};
    use std::sync::Mutex;

    /// Always picks the given index and the minimum interval
    struct FixedJitter(usize);

    impl Jitter for FixedJitter {
        fn interval(&self, min: Duration, _max: Duration) -> Duration {
            min
        }

        fn pick(&self, _len: usize) -> usize {
            self.0
        }
    }

    struct MockProber {
        result: Result<String, ProbeFailure>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RelayProber for MockProber {
        async fn probe(&self, endpoint: &RelayEndpoint) -> Result<String, ProbeFailure> {
            self.seen.lock().unwrap().push(endpoint.url.clone());
            self.result.clone()
        }
    }

    async fn healthy_node(db: &Arc<dyn Database>, node_id: &str) -> Node {
        let node = HeartbeatRegistrar::new(db.clone())
            .record_heartbeat(Heartbeat {
                node_id: node_id.into(),
                stream_id: "s1".into(),
                stats_url: format!("http://{node_id}.example:8080/stats"),
                relay_url: None,
            })
            .await
            .unwrap();
        db.insert_probe_result(&ProbeResult::new(&node, ProbeType::StatsPoll).succeeded(None))
            .await
            .unwrap();
        node
    }

    async fn setup() -> (Arc<dyn Database>, tempfile::TempDir) {
        let (db, dir) = create_test_database().await;
        db.insert_stream(&Stream::new("s1".into(), "0x".into(), 100.0, "rtmp://src".into())).await.unwrap();
        (db, dir)
    }

    fn prober(db: Arc<dyn Database>, mock: Arc<MockProber>, pick: usize) -> SpotCheckProber {
        SpotCheckProber::new(db, mock, Arc::new(FixedJitter(pick)), SpotCheckConfig::default())
    }

    #[tokio::test]
    async fn test_empty_pool_skips_cycle() {
        let (db, _dir) = setup().await;
        let mock = Arc::new(MockProber { result: Ok("ok".into()), seen: Mutex::new(Vec::new()) });

        // Active but never successfully polled
        HeartbeatRegistrar::new(db.clone())
            .record_heartbeat(Heartbeat {
                node_id: "fresh".into(),
                stream_id: "s1".into(),
                stats_url: "http://fresh.example/stats".into(),
                relay_url: None,
            })
            .await
            .unwrap();

        assert!(prober(db, mock.clone(), 0).run_cycle().await.unwrap().is_none());
        assert!(mock.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_flags_node() {
        let (db, _dir) = setup().await;
        healthy_node(&db, "a").await;
        healthy_node(&db, "b").await;
        let mock = Arc::new(MockProber {
            result: Err(ProbeFailure::Timeout(Duration::from_secs(15))),
            seen: Mutex::new(Vec::new()),
        });

        // Pool is ordered by node_id, so index 1 is "b"
        let outcome = prober(db.clone(), mock.clone(), 1).run_cycle().await.unwrap().unwrap();
        assert_eq!(outcome.node_id, "b");
        assert!(!outcome.passed);
        assert_eq!(mock.seen.lock().unwrap().as_slice(), ["rtmp://b.example:1935/live/s1"]);

        assert_eq!(db.get_node("b").await.unwrap().unwrap().status, NodeStatus::Flagged);
        assert_eq!(db.get_node("a").await.unwrap().unwrap().status, NodeStatus::Active);

        let recorded = &db.recent_probe_results("b", 1).await.unwrap()[0];
        assert_eq!(recorded.probe_type, ProbeType::SpotCheck);
        assert_eq!(recorded.error_message.as_deref(), Some("Timed out after 15s"));
    }

    #[tokio::test]
    async fn test_success_leaves_node_active() {
        let (db, _dir) = setup().await;
        healthy_node(&db, "a").await;
        let mock = Arc::new(MockProber { result: Ok("1 stream(s): video:h264".into()), seen: Mutex::new(Vec::new()) });

        let outcome = prober(db.clone(), mock, 0).run_cycle().await.unwrap().unwrap();
        assert!(outcome.passed);
        assert_eq!(db.get_node("a").await.unwrap().unwrap().status, NodeStatus::Active);

        let recorded = &db.recent_probe_results("a", 1).await.unwrap()[0];
        assert!(recorded.success);
        assert_eq!(recorded.probe_type, ProbeType::SpotCheck);
    }

    #[tokio::test]
    async fn test_flagged_node_leaves_the_pool() {
        let (db, _dir) = setup().await;
        healthy_node(&db, "a").await;
        let mock = Arc::new(MockProber {
            result: Err(ProbeFailure::Protocol("No media streams found".into())),
            seen: Mutex::new(Vec::new()),
        });

        let probe = prober(db.clone(), mock, 0);
        assert!(probe.run_cycle().await.unwrap().is_some());
        assert!(probe.run_cycle().await.unwrap().is_none());
    }

    #[test]
    fn test_thread_rng_jitter_stays_in_bounds() {
        let jitter = ThreadRngJitter;
        for _ in 0..100 {
            let d = jitter.interval(Duration::from_secs(300), Duration::from_secs(900));
            assert!((300..=900).contains(&d.as_secs()));
            assert!(jitter.pick(3) < 3);
        }
        assert_eq!(jitter.interval(Duration::from_secs(5), Duration::from_secs(5)).as_secs(), 5);
    }

    /// Changes the node's state while the check is in flight, then fails it
    struct InterferingProber {
        db: Arc<dyn Database>,
        move_to_stream: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl RelayProber for InterferingProber {
        async fn probe(&self, _endpoint: &RelayEndpoint) -> Result<String, ProbeFailure> {
            match self.move_to_stream {
                Some(stream_id) => {
                    HeartbeatRegistrar::new(self.db.clone())
                        .record_heartbeat(Heartbeat {
                            node_id: "a".into(),
                            stream_id: stream_id.into(),
                            stats_url: "http://a.example:8080/stats".into(),
                            relay_url: None,
                        })
                        .await
                        .unwrap();
                }
                None => {
                    let demoted = self.db.demote_stale_nodes(Utc::now() + chrono::Duration::hours(1)).await.unwrap();
                    assert_eq!(demoted, vec!["a".to_string()]);
                }
            }
            Err(ProbeFailure::Protocol("no video stream".into()))
        }
    }

    fn interfering(db: &Arc<dyn Database>, move_to_stream: Option<&'static str>) -> SpotCheckProber {
        SpotCheckProber::new(
            db.clone(),
            Arc::new(InterferingProber { db: db.clone(), move_to_stream }),
            Arc::new(FixedJitter(0)),
            SpotCheckConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_node_demoted_mid_check_is_not_flagged() {
        let (db, _dir) = setup().await;
        healthy_node(&db, "a").await;

        let outcome = interfering(&db, None).run_cycle().await.unwrap().unwrap();
        assert!(!outcome.passed);

        assert_eq!(db.get_node("a").await.unwrap().unwrap().status, NodeStatus::Inactive);
        // The failed check itself is still on record
        let recorded = &db.recent_probe_results("a", 1).await.unwrap()[0];
        assert_eq!(recorded.probe_type, ProbeType::SpotCheck);
        assert!(!recorded.success);
    }

    #[tokio::test]
    async fn test_node_moved_mid_check_is_not_flagged() {
        let (db, _dir) = setup().await;
        db.insert_stream(&Stream::new("s2".into(), "0x".into(), 10.0, "rtmp://src".into())).await.unwrap();
        healthy_node(&db, "a").await;

        let outcome = interfering(&db, Some("s2")).run_cycle().await.unwrap().unwrap();
        assert_eq!(outcome.stream_id, "s1");

        let node = db.get_node("a").await.unwrap().unwrap();
        assert_eq!(node.stream_id, "s2");
        assert_eq!(node.status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_record_spot_check_reports_whether_it_flagged() {
        let (db, _dir) = setup().await;
        let node = healthy_node(&db, "a").await;
        let failed = ProbeResult::new(&node, ProbeType::SpotCheck).failed("x");

        assert!(db.record_spot_check(&failed, true).await.unwrap());
        // Already flagged: the row is kept, nothing left to flag
        assert!(!db.record_spot_check(&failed, true).await.unwrap());
        assert_eq!(db.recent_probe_results("a", 10).await.unwrap().len(), 3);
    }
}

