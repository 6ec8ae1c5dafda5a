//! Integration tests for the coordinator
//!
//! These tests drive the public services against a real on-disk database.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use streamr_coordinator::config::Config;
use streamr_coordinator::database::models::{ProbeResult, ProbeType, StreamStatus};
use streamr_coordinator::heartbeat::Heartbeat;
use streamr_coordinator::lifecycle::{NewStream, StreamFilter};
use streamr_coordinator::monitoring::checker::RelayEndpoint;
use streamr_coordinator::monitoring::{Jitter, ProbeFailure, RelayProber, SpotCheckProber};
use streamr_coordinator::{Coordinator, CoordinatorError, pool};
use tempfile::TempDir;

async fn coordinator() -> (Coordinator, TempDir) {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().expect("temp dir");
    let pool = pool::open_local(dir.path().join("coordinator.db"), 4).await.expect("open database");
    (Coordinator::from_pool(pool, &Config::default()), dir)
}

fn new_stream(stream_id: &str, token_balance: f64) -> NewStream {
    NewStream {
        stream_id: stream_id.into(),
        sponsor_address: "0xsponsor".into(),
        token_balance,
        rtmp_url: "rtmp://ingest.example/live".into(),
    }
}

fn heartbeat(node_id: &str, stream_id: &str) -> Heartbeat {
    Heartbeat {
        node_id: node_id.into(),
        stream_id: stream_id.into(),
        stats_url: format!("http://{node_id}.example:8080/stats"),
        relay_url: None,
    }
}

#[tokio::test]
async fn test_stream_lifecycle_end_to_end() {
    let (coordinator, _dir) = coordinator().await;
    let lifecycle = &coordinator.lifecycle;

    let stream = lifecycle.register_stream(new_stream("s1", 10.0)).await.unwrap();
    assert_eq!(stream.status, StreamStatus::Ready);

    lifecycle.transition("s1", StreamStatus::Testing).await.unwrap();
    let live = lifecycle.transition("s1", StreamStatus::Live).await.unwrap();
    assert!(live.live_started_at.is_some());
    assert!(live.testing_started_at.is_none());

    let live_ids: Vec<_> = lifecycle.live_streams().await.unwrap().into_iter().map(|s| s.stream_id).collect();
    assert_eq!(live_ids, vec!["s1"]);

    lifecycle.transition("s1", StreamStatus::Offline).await.unwrap();
    assert!(lifecycle.live_streams().await.unwrap().is_empty());
    assert_eq!(lifecycle.operational_streams().await.unwrap().len(), 1);

    lifecycle.transition("s1", StreamStatus::Stale).await.unwrap();
    assert!(lifecycle.operational_streams().await.unwrap().is_empty());

    let archived = lifecycle.transition("s1", StreamStatus::Archived).await.unwrap();
    assert!(archived.archived_at.is_some());

    for target in StreamStatus::ALL {
        let err = lifecycle.transition("s1", target).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }), "ARCHIVED -> {target}");
    }

    let history = lifecycle.transition_history("s1").await.unwrap();
    let path: Vec<_> = history.iter().map(|t| t.to_status).collect();
    assert_eq!(
        path,
        vec![
            StreamStatus::Testing,
            StreamStatus::Live,
            StreamStatus::Offline,
            StreamStatus::Stale,
            StreamStatus::Archived
        ]
    );

    let listed = lifecycle.list_streams(StreamFilter::Status(StreamStatus::Archived)).await.unwrap();
    assert_eq!(listed.len(), 1);
}

/// Fails every relay whose host starts with `prefix`
struct FailingPrefixProber {
    prefix: &'static str,
}

#[async_trait::async_trait]
impl RelayProber for FailingPrefixProber {
    async fn probe(&self, endpoint: &RelayEndpoint) -> Result<String, ProbeFailure> {
        if endpoint.host.starts_with(self.prefix) {
            Err(ProbeFailure::Protocol("no video stream".into()))
        } else {
            Ok("video h264".into())
        }
    }
}

struct FirstCandidate;

impl Jitter for FirstCandidate {
    fn interval(&self, min: std::time::Duration, _max: std::time::Duration) -> std::time::Duration {
        min
    }

    fn pick(&self, _len: usize) -> usize {
        0
    }
}

#[tokio::test]
async fn test_payout_applies_penalty_after_failed_spot_check() {
    let (coordinator, _dir) = coordinator().await;
    let database = coordinator.database.clone();

    coordinator.lifecycle.register_stream(new_stream("s1", 100.0)).await.unwrap();
    let node_a = coordinator.heartbeats.record_heartbeat(heartbeat("node-a", "s1")).await.unwrap();
    let node_b = coordinator.heartbeats.record_heartbeat(heartbeat("node-b", "s1")).await.unwrap();

    let recent = Utc::now() - ChronoDuration::minutes(1);
    for (node, polls) in [(&node_a, 80), (&node_b, 20)] {
        for _ in 0..polls {
            let poll = ProbeResult::new(node, ProbeType::StatsPoll).succeeded(None).at(recent);
            database.insert_probe_result(&poll).await.unwrap();
        }
    }

    let prober = SpotCheckProber::new(
        database.clone(),
        Arc::new(FailingPrefixProber { prefix: "node-a" }),
        Arc::new(FirstCandidate),
        Config::default().spot_check,
    );
    let outcome = prober.run_cycle().await.unwrap().expect("a node was checked");
    assert_eq!(outcome.node_id, "node-a");
    assert!(!outcome.passed);

    let flagged = database.get_node("node-a").await.unwrap().unwrap();
    assert_eq!(flagged.status.as_str(), "flagged");

    let report = coordinator.payouts.calculate_payouts(24).await.unwrap();
    let stream = &report["s1"];
    assert_eq!(stream.stream_info.total_successful_probes, 100);

    let a = &stream.node_payouts["node-a"];
    assert!((a.base_payout - 80.0).abs() < 1e-9);
    assert!((a.final_payout - 40.0).abs() < 1e-9);
    assert_eq!(a.failed_spot_checks, 1);
    assert!(a.is_flagged);

    let b = &stream.node_payouts["node-b"];
    assert!((b.base_payout - 20.0).abs() < 1e-9);
    assert!((b.final_payout - 20.0).abs() < 1e-9);
    assert!(!b.is_flagged);

    let summary = coordinator.payouts.node_earnings_summary("node-a", 1).await.unwrap();
    assert!((summary.total_earnings - 40.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_payout_window_excludes_older_polls() {
    let (coordinator, _dir) = coordinator().await;
    let database = coordinator.database.clone();

    coordinator.lifecycle.register_stream(new_stream("s1", 10.0)).await.unwrap();
    let node_a = coordinator.heartbeats.record_heartbeat(heartbeat("node-a", "s1")).await.unwrap();
    let node_b = coordinator.heartbeats.record_heartbeat(heartbeat("node-b", "s1")).await.unwrap();

    let inside = Utc::now() - ChronoDuration::minutes(30);
    let outside = Utc::now() - ChronoDuration::hours(3);
    for _ in 0..3 {
        let poll = ProbeResult::new(&node_a, ProbeType::StatsPoll).succeeded(None).at(inside);
        database.insert_probe_result(&poll).await.unwrap();
    }
    // node-b only polled before the window, and failed a spot-check there too
    for _ in 0..5 {
        let poll = ProbeResult::new(&node_b, ProbeType::StatsPoll).succeeded(None).at(outside);
        database.insert_probe_result(&poll).await.unwrap();
    }
    let old_check = ProbeResult::new(&node_a, ProbeType::SpotCheck).failed("no video stream").at(outside);
    database.insert_probe_result(&old_check).await.unwrap();

    let report = coordinator.payouts.calculate_payouts(1).await.unwrap();
    let stream = &report["s1"];
    assert_eq!(stream.stream_info.total_successful_probes, 3);
    assert!(!stream.node_payouts.contains_key("node-b"));

    let a = &stream.node_payouts["node-a"];
    assert!((a.final_payout - 10.0).abs() < 1e-9);
    assert_eq!(a.total_polls, 3);
    assert_eq!(a.failed_spot_checks, 0);

    // Widening the window brings the older rows back
    let wide = coordinator.payouts.calculate_payouts(4).await.unwrap();
    assert_eq!(wide["s1"].stream_info.total_successful_probes, 8);
    assert_eq!(wide["s1"].node_payouts["node-a"].failed_spot_checks, 1);
}

#[tokio::test]
async fn test_payouts_skip_stale_and_archived_streams() {
    let (coordinator, _dir) = coordinator().await;
    let database = coordinator.database.clone();
    let lifecycle = &coordinator.lifecycle;

    let paths: [(&str, &[StreamStatus]); 4] = [
        ("live", &[StreamStatus::Live]),
        ("offline", &[StreamStatus::Live, StreamStatus::Offline]),
        ("stale", &[StreamStatus::Live, StreamStatus::Offline, StreamStatus::Stale]),
        ("archived", &[StreamStatus::Live, StreamStatus::Offline, StreamStatus::Archived]),
    ];

    for (stream_id, path) in paths {
        lifecycle.register_stream(new_stream(stream_id, 50.0)).await.unwrap();
        let node = coordinator
            .heartbeats
            .record_heartbeat(heartbeat(&format!("node-{stream_id}"), stream_id))
            .await
            .unwrap();
        for _ in 0..4 {
            database
                .insert_probe_result(&ProbeResult::new(&node, ProbeType::StatsPoll).succeeded(None))
                .await
                .unwrap();
        }
        for status in path {
            lifecycle.transition(stream_id, *status).await.unwrap();
        }
    }

    let report = coordinator.payouts.calculate_payouts(1).await.unwrap();
    let paid: Vec<&str> = report.keys().map(String::as_str).collect();
    assert_eq!(paid, vec!["live", "offline"]);
}
