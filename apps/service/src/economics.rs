use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EconomicsConfig;
use crate::database::Database;
use crate::database::models::{BandwidthLedger, NodeStatus, StreamStatus, UserAccount};
use crate::error::{CoordinatorError, CoordinatorResult};

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

/// Sessions counted as active on the economics dashboard
const ACTIVE_SESSION_STATUSES: [StreamStatus; 3] = [StreamStatus::Ready, StreamStatus::Testing, StreamStatus::Live];

/// 30-day earnings band, in USD, of a qualified earner
const QUALIFIED_EARNINGS_USD: (f64, f64) = (50.0, 200.0);

const LOW_TRUST_THRESHOLD: f64 = 0.8;
const TOP_EARNERS: usize = 5;

/// Bandwidth usage claimed by a node for one interval
#[derive(Debug, Clone, Deserialize)]
pub struct BandwidthReport {
    pub reporting_node_id: String,
    pub bytes_transferred: i64,
    pub start_interval: DateTime<Utc>,
    pub end_interval: DateTime<Utc>,
    #[serde(default)]
    pub source_bitrate_kbps: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyEarnings {
    /// Start of the hour, formatted `HH:00`
    pub hour: String,
    pub gb_relayed: f64,
    pub earnings_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEconomics {
    pub node_id: String,
    pub balance_usd: f64,
    pub earnings_last_30d: f64,
    pub gb_relayed: f64,
    pub trust_score: f64,
    pub flags: Vec<String>,
    /// Most recent hour first
    pub hourly_earnings: Vec<HourlyEarnings>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopEarner {
    pub node_id: String,
    pub earnings: f64,
    pub gb_relayed: f64,
    pub trust_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousActivity {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicsDashboard {
    pub active_sessions: u64,
    pub total_nodes: u64,
    pub total_gb_delivered_24h: f64,
    pub platform_margin_percent: f64,
    pub avg_creator_revenue_share: f64,
    pub qualified_earners_count: u64,
    pub top_earners: Vec<TopEarner>,
    pub suspicious_activity: Vec<SuspiciousActivity>,
}

fn bytes_to_gb(bytes: i64) -> f64 {
    bytes.max(0) as f64 / BYTES_PER_GB
}

/// Shorten an identity for public listings
fn truncate_id(id: &str) -> String {
    let prefix: String = id.chars().take(8).collect();
    format!("{prefix}...")
}

/// Verified GB per hour over the 24 hours before `now`, most recent first
fn hourly_buckets(reports: &[BandwidthLedger], now: DateTime<Utc>, usd_per_gb: f64) -> Vec<HourlyEarnings> {
    (0..24)
        .map(|i| {
            let hour_end = now - Duration::hours(i);
            let hour_start = hour_end - Duration::hours(1);
            let bytes: i64 = reports
                .iter()
                .filter(|r| r.is_verified && r.report_timestamp >= hour_start && r.report_timestamp < hour_end)
                .map(|r| r.bytes_transferred)
                .sum();
            let gb_relayed = bytes_to_gb(bytes);

            HourlyEarnings {
                hour: hour_start.format("%H:00").to_string(),
                gb_relayed,
                earnings_usd: gb_relayed * usd_per_gb,
            }
        })
        .collect()
}

/// Bandwidth reports, user accounts and the economics views built on them
#[derive(Clone)]
pub struct EconomicsLedger {
    database: Arc<dyn Database>,
    config: EconomicsConfig,
}

impl EconomicsLedger {
    pub fn new(database: Arc<dyn Database>, config: EconomicsConfig) -> Self {
        Self { database, config }
    }

    /// Store an unverified bandwidth report for a session
    pub async fn record_bandwidth_report(
        &self,
        session_id: &str,
        report: BandwidthReport,
    ) -> CoordinatorResult<BandwidthLedger> {
        if self.database.get_stream(session_id).await?.is_none() {
            return Err(CoordinatorError::StreamNotFound(session_id.to_string()));
        }

        let attached = self
            .database
            .get_node(&report.reporting_node_id)
            .await?
            .is_some_and(|node| node.stream_id == session_id);
        if !attached {
            return Err(CoordinatorError::NodeNotFound(format!(
                "{} is not relaying session {session_id}",
                report.reporting_node_id
            )));
        }

        if report.bytes_transferred <= 0 {
            return Err(CoordinatorError::validation("bytes_transferred must be positive"));
        }
        if report.end_interval <= report.start_interval {
            return Err(CoordinatorError::validation("end_interval must be after start_interval"));
        }

        let mut entry = BandwidthLedger {
            id: None,
            session_id: session_id.to_string(),
            reporting_node_id: report.reporting_node_id,
            bytes_transferred: report.bytes_transferred,
            start_interval: report.start_interval,
            end_interval: report.end_interval,
            source_bitrate_kbps: report.source_bitrate_kbps,
            is_verified: false,
            trust_score: None,
            verification_notes: None,
            report_timestamp: Utc::now(),
        };
        entry.id = Some(self.database.insert_bandwidth_report(&entry).await?);

        info!(
            session_id,
            node_id = %entry.reporting_node_id,
            bytes = entry.bytes_transferred,
            "Recorded bandwidth report"
        );
        Ok(entry)
    }

    async fn get_or_create_account(&self, user_id: &str) -> CoordinatorResult<UserAccount> {
        if let Some(account) = self.database.get_user_account(user_id).await? {
            return Ok(account);
        }

        let account = UserAccount::new(user_id.to_string());
        self.database.insert_user_account(&account).await?;

        // Another request may have created it first
        Ok(self.database.get_user_account(user_id).await?.unwrap_or(account))
    }

    /// Account totals plus an hourly view of the last 24h
    pub async fn node_economics(&self, node_id: &str) -> CoordinatorResult<NodeEconomics> {
        if node_id.trim().is_empty() {
            return Err(CoordinatorError::validation("node_id must not be empty"));
        }

        let account = self.get_or_create_account(node_id).await?;
        let now = Utc::now();
        let reports = self
            .database
            .list_bandwidth_reports(now - Duration::hours(24), Some(node_id), true)
            .await?;

        Ok(NodeEconomics {
            node_id: node_id.to_string(),
            balance_usd: account.balance_usd,
            earnings_last_30d: account.earnings_last_30d,
            gb_relayed: account.total_gb_relayed,
            trust_score: account.trust_score,
            flags: account.flags,
            hourly_earnings: hourly_buckets(&reports, now, self.config.usd_per_gb),
        })
    }

    pub async fn dashboard(&self) -> CoordinatorResult<EconomicsDashboard> {
        let day_ago = Utc::now() - Duration::hours(24);

        let active_sessions = self.database.count_streams(&ACTIVE_SESSION_STATUSES).await?;
        let total_nodes = self.database.count_nodes(NodeStatus::Active).await?;
        let verified_bytes: i64 = self
            .database
            .list_bandwidth_reports(day_ago, None, true)
            .await?
            .iter()
            .map(|r| r.bytes_transferred)
            .sum();
        let (low, high) = QUALIFIED_EARNINGS_USD;
        let qualified_earners_count = self.database.count_accounts_with_earnings_between(low, high).await?;

        let top_earners = self
            .database
            .top_earners(TOP_EARNERS)
            .await?
            .into_iter()
            .map(|account| TopEarner {
                node_id: truncate_id(&account.user_id),
                earnings: account.earnings_last_30d,
                gb_relayed: account.total_gb_relayed,
                trust_score: account.trust_score,
            })
            .collect();

        let low_trust = self.database.count_low_trust_reports(day_ago, LOW_TRUST_THRESHOLD).await?;

        Ok(EconomicsDashboard {
            active_sessions,
            total_nodes,
            total_gb_delivered_24h: bytes_to_gb(verified_bytes),
            platform_margin_percent: self.config.platform_margin_percent,
            avg_creator_revenue_share: self.config.creator_revenue_share_percent,
            qualified_earners_count,
            top_earners,
            suspicious_activity: vec![SuspiciousActivity {
                kind: "low_trust_reports".to_string(),
                count: low_trust,
                description: format!("Bandwidth reports with trust score < {LOW_TRUST_THRESHOLD}"),
            }],
        })
    }
}
