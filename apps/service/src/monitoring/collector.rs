use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::checker::StatsFetcher;
use super::scheduler::PeriodicJob;
use super::types::{PollVerdict, RoundSummary, StatsReport};
use crate::config::CollectorConfig;
use crate::database::Database;
use crate::database::models::{Node, NodeStatus, ProbeResult, ProbeType};

/// Turn a fetch outcome into the probe record for a node
pub fn judge_poll(node: &Node, outcome: Result<String, super::checker::ProbeFailure>) -> (PollVerdict, ProbeResult) {
    let result = ProbeResult::new(node, ProbeType::StatsPoll);

    match outcome {
        Err(failure) => (PollVerdict::Unreachable, result.failed(failure.to_string())),
        Ok(body) => match serde_json::from_str::<StatsReport>(&body) {
            Ok(report) if report.is_relaying(&node.stream_id) => (PollVerdict::Relaying, result.succeeded(Some(body))),
            // Reachable, but the body does not show the stream being relayed
            _ => (PollVerdict::NotRelaying, result.not_relaying(Some(body))),
        },
    }
}

/// Polls every active node's stats endpoint and records one probe result each
pub struct StatsCollector {
    database: Arc<dyn Database>,
    fetcher: Arc<dyn StatsFetcher>,
    config: CollectorConfig,
}

impl StatsCollector {
    pub fn new(database: Arc<dyn Database>, fetcher: Arc<dyn StatsFetcher>, config: CollectorConfig) -> Self {
        Self { database, fetcher, config }
    }

    /// Run one collection round over all active nodes
    pub async fn run_round(&self) -> Result<RoundSummary> {
        let nodes = self.database.list_nodes_by_status(NodeStatus::Active).await?;
        if nodes.is_empty() {
            debug!("No active nodes to poll");
            return Ok(RoundSummary::default());
        }

        let fetcher = &self.fetcher;
        let polls: Vec<(PollVerdict, ProbeResult)> = stream::iter(nodes)
            .map(|node| async move {
                let outcome = fetcher.fetch(&node.stats_url).await;
                judge_poll(&node, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_polls.max(1))
            .collect()
            .await;

        let mut summary = RoundSummary::default();
        for (verdict, result) in polls {
            summary.record(verdict);
            if let Some(error) = &result.error_message {
                debug!(node_id = %result.node_id, "Stats poll failed: {}", error);
            }
            if let Err(e) = self.database.insert_probe_result(&result).await {
                summary.unrecorded += 1;
                warn!(node_id = %result.node_id, "Failed to record stats poll: {:#}", e);
            }
        }

        info!(
            polled = summary.polled,
            relaying = summary.relaying,
            not_relaying = summary.not_relaying,
            unreachable = summary.unreachable,
            "Stats collection round complete"
        );

        Ok(summary)
    }
}

#[async_trait::async_trait]
impl PeriodicJob for StatsCollector {
    fn name(&self) -> &'static str {
        "stats-collector"
    }

    async fn run_once(&self) -> Result<()> {
        self.run_round().await.map(|_| ())
    }

    fn next_delay(&self) -> Duration {
        self.config.poll_interval()
    }

    fn error_backoff(&self) -> Duration {
        self.config.retry_backoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Stream;
    use crate::database::testing::create_test_database;
    use crate::heartbeat::{Heartbeat, HeartbeatRegistrar};
    use crate::monitoring::checker::ProbeFailure;
    use std::collections::HashMap;

    /// Canned responses keyed by stats URL
    struct MockFetcher {
        responses: HashMap<String, Result<String, ProbeFailure>>,
    }

    #[async_trait::async_trait]
    impl StatsFetcher for MockFetcher {
        async fn fetch(&self, stats_url: &str) -> Result<String, ProbeFailure> {
            self.responses
                .get(stats_url)
                .cloned()
                .unwrap_or_else(|| Err(ProbeFailure::Transport("connection refused".into())))
        }
    }

    const RELAYING: &str = r#"{"streams":[{"stream_name":"live/s1","connections":[{"state":"publishing"}]}]}"#;

    async fn register(registrar: &HeartbeatRegistrar, node_id: &str) -> String {
        let stats_url = format!("http://{node_id}.example:8080/stats");
        registrar
            .record_heartbeat(Heartbeat {
                node_id: node_id.into(),
                stream_id: "s1".into(),
                stats_url: stats_url.clone(),
                relay_url: None,
            })
            .await
            .unwrap();
        stats_url
    }

    #[tokio::test]
    async fn test_round_records_one_result_per_active_node() {
        let (db, _dir) = create_test_database().await;
        db.insert_stream(&Stream::new("s1".into(), "0x".into(), 100.0, "rtmp://src".into())).await.unwrap();
        let registrar = HeartbeatRegistrar::new(db.clone());

        let good = register(&registrar, "good").await;
        let idle = register(&registrar, "idle").await;
        let down = register(&registrar, "down").await;
        let garbled = register(&registrar, "garbled").await;
        register(&registrar, "flagged").await;
        db.record_spot_check(
            &ProbeResult::new(&db.get_node("flagged").await.unwrap().unwrap(), ProbeType::SpotCheck).failed("x"),
            true,
        )
        .await
        .unwrap();

        let responses = HashMap::from([
            (good, Ok(RELAYING.to_string())),
            (idle, Ok(r#"{"streams":[]}"#.to_string())),
            (down, Err(ProbeFailure::HttpStatus(503))),
            (garbled, Ok("<html>".to_string())),
        ]);
        let collector = StatsCollector::new(db.clone(), Arc::new(MockFetcher { responses }), CollectorConfig::default());

        let summary = collector.run_round().await.unwrap();
        assert_eq!(
            summary,
            RoundSummary { polled: 4, relaying: 1, not_relaying: 2, unreachable: 1, unrecorded: 0 }
        );

        let good_probe = &db.recent_probe_results("good", 1).await.unwrap()[0];
        assert!(good_probe.success);
        assert_eq!(good_probe.response_data.as_deref(), Some(RELAYING));

        let idle_probe = &db.recent_probe_results("idle", 1).await.unwrap()[0];
        assert!(!idle_probe.success);
        assert!(idle_probe.error_message.is_none());

        let garbled_probe = &db.recent_probe_results("garbled", 1).await.unwrap()[0];
        assert!(!garbled_probe.success);
        assert_eq!(garbled_probe.response_data.as_deref(), Some("<html>"));

        let down_probe = &db.recent_probe_results("down", 1).await.unwrap()[0];
        assert_eq!(down_probe.error_message.as_deref(), Some("HTTP status 503"));

        // Flagged nodes are not polled; only the spot-check row exists
        let flagged = db.recent_probe_results("flagged", 10).await.unwrap();
        assert!(flagged.iter().all(|p| p.probe_type == ProbeType::SpotCheck));
    }

    #[tokio::test]
    async fn test_round_with_no_active_nodes_is_a_no_op() {
        let (db, _dir) = create_test_database().await;
        let collector = StatsCollector::new(
            db,
            Arc::new(MockFetcher { responses: HashMap::new() }),
            CollectorConfig::default(),
        );
        assert_eq!(collector.run_round().await.unwrap(), RoundSummary::default());
    }
}
