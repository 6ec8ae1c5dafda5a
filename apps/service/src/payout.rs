//! Contribution-weighted payouts with a graduated fraud penalty.
//!
//! For each operational stream, the token pool is split between nodes in
//! proportion to their successful stats polls over the window. Every failed
//! spot-check in the window multiplies a node's share by
//! `1 - penalty_factor`; the withheld remainder is not redistributed.
//!
//! Shares and uptimes are reported as fractions in `[0, 1]`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::database::Database;
use crate::database::models::{ProbeTally, Stream, StreamStatus};
use crate::error::{CoordinatorError, CoordinatorResult};

/// Window used by the leaderboard
const LEADERBOARD_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodePayout {
    pub base_payout: f64,
    pub final_payout: f64,
    pub contribution_percentage: f64,
    pub uptime_percentage: f64,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_spot_checks: u64,
    pub penalty_multiplier: f64,
    pub is_flagged: bool,
    pub penalty_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamPayoutInfo {
    pub stream_id: String,
    pub sponsor: String,
    pub total_pool: f64,
    pub total_successful_probes: u64,
    pub node_count: usize,
    pub calculation_period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamPayout {
    pub stream_info: StreamPayoutInfo,
    pub node_payouts: BTreeMap<String, NodePayout>,
}

/// Payouts keyed by stream id
pub type PayoutReport = BTreeMap<String, StreamPayout>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEarnings {
    pub stream_id: String,
    pub uptime_percentage: f64,
    pub contribution_percentage: f64,
    pub base_payout: f64,
    pub final_payout: f64,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_spot_checks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEarningsSummary {
    pub node_id: String,
    pub period: String,
    pub total_earnings: f64,
    pub streams_participated: usize,
    pub stream_details: Vec<StreamEarnings>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub node_id: String,
    pub uptime_percentage: f64,
    pub total_probes: u64,
    pub successful_probes: u64,
    pub estimated_score: u64,
}

/// `(1 - penalty_factor) ^ failed_spot_checks`
pub fn penalty_multiplier(penalty_factor: f64, failed_spot_checks: u64) -> f64 {
    let exponent = i32::try_from(failed_spot_checks).unwrap_or(i32::MAX);
    (1.0 - penalty_factor).powi(exponent)
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 { 0.0 } else { numerator as f64 / denominator as f64 }
}

/// Payouts for one stream from its per-node tallies.
///
/// Returns `None` when no node has a successful poll in the window. Tallies
/// for other streams are ignored.
pub fn compute_stream_payouts(
    stream: &Stream,
    tallies: &[ProbeTally],
    penalty_factor: f64,
    calculation_period: String,
) -> Option<StreamPayout> {
    let tallies: Vec<&ProbeTally> = tallies.iter().filter(|t| t.stream_id == stream.stream_id).collect();
    let total_successful: u64 = tallies.iter().map(|t| t.successful_polls).sum();
    if total_successful == 0 {
        return None;
    }

    let node_payouts: BTreeMap<String, NodePayout> = tallies
        .iter()
        .map(|tally| {
            let share = ratio(tally.successful_polls, total_successful);
            let base_payout = stream.token_balance * share;
            let multiplier = penalty_multiplier(penalty_factor, tally.failed_spot_checks);
            let is_flagged = tally.failed_spot_checks > 0;

            let payout = NodePayout {
                base_payout,
                final_payout: base_payout * multiplier,
                contribution_percentage: share,
                uptime_percentage: ratio(tally.successful_polls, tally.total_polls),
                total_polls: tally.total_polls,
                successful_polls: tally.successful_polls,
                failed_spot_checks: tally.failed_spot_checks,
                penalty_multiplier: multiplier,
                is_flagged,
                penalty_reason: is_flagged
                    .then(|| format!("Failed {} spot-check(s)", tally.failed_spot_checks)),
            };
            (tally.node_id.clone(), payout)
        })
        .collect();

    Some(StreamPayout {
        stream_info: StreamPayoutInfo {
            stream_id: stream.stream_id.clone(),
            sponsor: stream.sponsor_address.clone(),
            total_pool: stream.token_balance,
            total_successful_probes: total_successful,
            node_count: node_payouts.len(),
            calculation_period,
        },
        node_payouts,
    })
}

/// `now - span`; a span that does not fit the calendar is a validation error
fn window_start(span: Option<TimeDelta>, param: &str) -> CoordinatorResult<DateTime<Utc>> {
    span.and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or_else(|| CoordinatorError::validation(format!("{param} is out of range")))
}

fn group_by_stream(tallies: Vec<ProbeTally>) -> HashMap<String, Vec<ProbeTally>> {
    let mut grouped: HashMap<String, Vec<ProbeTally>> = HashMap::new();
    for tally in tallies {
        grouped.entry(tally.stream_id.clone()).or_default().push(tally);
    }
    grouped
}

/// Read-only view over the probe log that prices node contributions
#[derive(Clone)]
pub struct PayoutEngine {
    database: Arc<dyn Database>,
    penalty_factor: f64,
}

impl PayoutEngine {
    pub fn new(database: Arc<dyn Database>, penalty_factor: f64) -> Self {
        Self { database, penalty_factor }
    }

    /// Payouts per operational stream over the last `hours_back` hours
    pub async fn calculate_payouts(&self, hours_back: i64) -> CoordinatorResult<PayoutReport> {
        if hours_back <= 0 {
            return Err(CoordinatorError::validation("hours_back must be positive"));
        }

        let since = window_start(TimeDelta::try_hours(hours_back), "hours_back")?;
        let streams = self.database.list_streams(Some(&StreamStatus::OPERATIONAL), None).await?;
        let mut by_stream = group_by_stream(self.database.probe_tallies(since, None).await?);
        let period = format!("Last {hours_back} hour(s)");

        let mut report = PayoutReport::new();
        for stream in streams {
            let tallies = by_stream.remove(&stream.stream_id).unwrap_or_default();
            match compute_stream_payouts(&stream, &tallies, self.penalty_factor, period.clone()) {
                Some(payout) => {
                    for (node_id, node) in &payout.node_payouts {
                        debug!(
                            stream_id = %stream.stream_id,
                            node_id = %node_id,
                            share = node.contribution_percentage,
                            final_payout = node.final_payout,
                            flagged = node.is_flagged,
                            "Node payout"
                        );
                    }
                    report.insert(stream.stream_id.clone(), payout);
                }
                None => debug!(stream_id = %stream.stream_id, "No successful polls in window; no payout"),
            }
        }

        info!(streams = report.len(), hours_back, "Calculated payouts");
        Ok(report)
    }

    /// A node's contribution-weighted earnings per stream over the last `days_back` days
    pub async fn node_earnings_summary(&self, node_id: &str, days_back: i64) -> CoordinatorResult<NodeEarningsSummary> {
        if days_back <= 0 {
            return Err(CoordinatorError::validation("days_back must be positive"));
        }

        let since = window_start(TimeDelta::try_days(days_back), "days_back")?;
        let node_tallies = self.database.probe_tallies(since, Some(node_id)).await?;
        if node_tallies.is_empty() && self.database.get_node(node_id).await?.is_none() {
            return Err(CoordinatorError::NodeNotFound(node_id.to_string()));
        }

        // Shares depend on every node in the stream, so load the full window
        let by_stream = if node_tallies.is_empty() {
            HashMap::new()
        } else {
            group_by_stream(self.database.probe_tallies(since, None).await?)
        };

        let mut stream_details = Vec::new();
        for tally in &node_tallies {
            let Some(stream) = self.database.get_stream(&tally.stream_id).await? else {
                continue;
            };
            let stream_tallies = by_stream.get(&tally.stream_id).map(Vec::as_slice).unwrap_or_default();
            let payout = compute_stream_payouts(&stream, stream_tallies, self.penalty_factor, String::new());
            let node_payout = payout.as_ref().and_then(|p| p.node_payouts.get(node_id));

            stream_details.push(StreamEarnings {
                stream_id: tally.stream_id.clone(),
                uptime_percentage: ratio(tally.successful_polls, tally.total_polls),
                contribution_percentage: node_payout.map(|p| p.contribution_percentage).unwrap_or(0.0),
                base_payout: node_payout.map(|p| p.base_payout).unwrap_or(0.0),
                final_payout: node_payout.map(|p| p.final_payout).unwrap_or(0.0),
                total_polls: tally.total_polls,
                successful_polls: tally.successful_polls,
                failed_spot_checks: tally.failed_spot_checks,
            });
        }

        Ok(NodeEarningsSummary {
            node_id: node_id.to_string(),
            period: format!("Last {days_back} day(s)"),
            total_earnings: stream_details.iter().map(|s| s.final_payout).sum(),
            streams_participated: stream_details.len(),
            stream_details,
        })
    }

    /// Nodes ranked by successful stats polls over the last week
    pub async fn leaderboard(&self, limit: usize) -> CoordinatorResult<Vec<LeaderboardEntry>> {
        if limit == 0 {
            return Err(CoordinatorError::validation("limit must be positive"));
        }

        let since = Utc::now() - TimeDelta::days(LEADERBOARD_DAYS);
        let mut per_node: HashMap<String, (u64, u64)> = HashMap::new();
        for tally in self.database.probe_tallies(since, None).await? {
            let entry = per_node.entry(tally.node_id).or_default();
            entry.0 += tally.total_polls;
            entry.1 += tally.successful_polls;
        }

        let mut ranked: Vec<(String, u64, u64)> = per_node
            .into_iter()
            .filter(|(_, (total, _))| *total > 0)
            .map(|(node_id, (total, successful))| (node_id, total, successful))
            .collect();
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

        Ok(ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(index, (node_id, total, successful))| LeaderboardEntry {
                rank: index + 1,
                node_id,
                uptime_percentage: ratio(successful, total),
                total_probes: total,
                successful_probes: successful,
                estimated_score: successful,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(pool: f64) -> Stream {
        Stream::new("s1".into(), "0xsponsor".into(), pool, "rtmp://src/live/s1".into())
    }

    fn tally(node_id: &str, total: u64, successful: u64, failed_spot_checks: u64) -> ProbeTally {
        ProbeTally {
            stream_id: "s1".into(),
            node_id: node_id.into(),
            total_polls: total,
            successful_polls: successful,
            failed_spot_checks,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_shares_follow_successful_polls() {
        let tallies = [tally("a", 100, 80, 0), tally("b", 40, 20, 0)];
        let payout = compute_stream_payouts(&stream(100.0), &tallies, 0.5, "Last 1 hour(s)".into()).unwrap();

        let a = &payout.node_payouts["a"];
        let b = &payout.node_payouts["b"];
        assert!(approx(a.base_payout, 80.0));
        assert!(approx(b.base_payout, 20.0));
        assert!(approx(a.uptime_percentage, 0.8));
        assert!(approx(b.uptime_percentage, 0.5));
        assert_eq!(payout.stream_info.total_successful_probes, 100);
        assert_eq!(payout.stream_info.node_count, 2);
    }

    #[test]
    fn test_shares_sum_to_one() {
        let tallies = [tally("a", 10, 7, 0), tally("b", 10, 3, 1), tally("c", 10, 11, 0), tally("d", 5, 0, 0)];
        let payout = compute_stream_payouts(&stream(42.0), &tallies, 0.5, String::new()).unwrap();

        let total: f64 = payout.node_payouts.values().map(|p| p.contribution_percentage).sum();
        assert!(approx(total, 1.0));
        assert!(approx(payout.node_payouts["d"].base_payout, 0.0));
    }

    #[test]
    fn test_each_failed_spot_check_halves_payout() {
        for failed in 0..5u64 {
            let tallies = [tally("a", 10, 10, failed)];
            let node = compute_stream_payouts(&stream(64.0), &tallies, 0.5, String::new()).unwrap().node_payouts["a"].clone();

            assert!(approx(node.final_payout, 64.0 * 0.5f64.powi(failed as i32)));
            assert_eq!(node.is_flagged, failed > 0);
            assert_eq!(node.penalty_reason.is_some(), failed > 0);
        }
    }

    #[test]
    fn test_no_successful_polls_means_no_payout() {
        let tallies = [tally("a", 10, 0, 0), tally("b", 0, 0, 2)];
        assert!(compute_stream_payouts(&stream(100.0), &tallies, 0.5, String::new()).is_none());
        assert!(compute_stream_payouts(&stream(100.0), &[], 0.5, String::new()).is_none());
    }

    #[test]
    fn test_uptime_is_zero_without_polls() {
        // Spot-checks only, alongside a node with successful polls
        let tallies = [tally("a", 10, 10, 0), tally("b", 0, 0, 1)];
        let payout = compute_stream_payouts(&stream(10.0), &tallies, 0.5, String::new()).unwrap();
        assert_eq!(payout.node_payouts["b"].uptime_percentage, 0.0);
        assert_eq!(payout.node_payouts["b"].final_payout, 0.0);
    }

    #[test]
    fn test_penalty_multiplier_edges() {
        assert_eq!(penalty_multiplier(0.5, 0), 1.0);
        assert_eq!(penalty_multiplier(0.0, 10), 1.0);
        assert_eq!(penalty_multiplier(1.0, 1), 0.0);
        assert!(approx(penalty_multiplier(0.25, 2), 0.5625));
    }

    #[test]
    fn test_tallies_for_other_streams_are_ignored() {
        let mut other = tally("x", 10, 10, 0);
        other.stream_id = "s2".into();
        let tallies = [tally("a", 10, 5, 0), other];

        let payout = compute_stream_payouts(&stream(10.0), &tallies, 0.5, String::new()).unwrap();
        assert_eq!(payout.node_payouts.len(), 1);
        assert!(approx(payout.node_payouts["a"].base_payout, 10.0));
    }

    #[tokio::test]
    async fn test_out_of_range_windows_are_rejected() {
        let (db, _dir) = crate::database::testing::create_test_database().await;
        let engine = PayoutEngine::new(db, 0.5);

        for hours_back in [0, -1, 3_000_000_000, i64::MAX] {
            let err = engine.calculate_payouts(hours_back).await.unwrap_err();
            assert!(matches!(err, CoordinatorError::Validation(_)), "hours_back={hours_back}: {err}");
        }
        for days_back in [0, 200_000_000, i64::MAX] {
            let err = engine.node_earnings_summary("n1", days_back).await.unwrap_err();
            assert!(matches!(err, CoordinatorError::Validation(_)), "days_back={days_back}: {err}");
        }
    }
}
