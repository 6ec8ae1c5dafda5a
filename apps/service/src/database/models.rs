use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convert a timestamp to Unix seconds for storage
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert stored Unix seconds back to a timestamp
pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// Lifecycle status of a sponsored stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    Ready,
    Testing,
    Live,
    Offline,
    Stale,
    Archived,
}

impl StreamStatus {
    pub const ALL: [StreamStatus; 6] = [
        StreamStatus::Ready,
        StreamStatus::Testing,
        StreamStatus::Live,
        StreamStatus::Offline,
        StreamStatus::Stale,
        StreamStatus::Archived,
    ];

    /// Statuses that take part in probing, payouts and dashboards
    pub const OPERATIONAL: [StreamStatus; 4] = [
        StreamStatus::Ready,
        StreamStatus::Testing,
        StreamStatus::Live,
        StreamStatus::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Ready => "READY",
            StreamStatus::Testing => "TESTING",
            StreamStatus::Live => "LIVE",
            StreamStatus::Offline => "OFFLINE",
            StreamStatus::Stale => "STALE",
            StreamStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown stream status: {s}"))
    }
}

/// Liveness/trust status of a relay node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
    Flagged,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 3] = [NodeStatus::Active, NodeStatus::Inactive, NodeStatus::Flagged];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
            NodeStatus::Flagged => "flagged",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NodeStatus::Active),
            "inactive" => Ok(NodeStatus::Inactive),
            "flagged" => Ok(NodeStatus::Flagged),
            other => Err(format!("Unknown node status: {other}")),
        }
    }
}

/// Kind of observation stored in the probe log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeType {
    StatsPoll,
    SpotCheck,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::StatsPoll => "stats_poll",
            ProbeType::SpotCheck => "spot_check",
        }
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stats_poll" => Ok(ProbeType::StatsPoll),
            "spot_check" => Ok(ProbeType::SpotCheck),
            other => Err(format!("Unknown probe type: {other}")),
        }
    }
}

/// Stream model - a sponsored live-video session relayed by the swarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: Option<i64>,
    pub stream_id: String,
    pub sponsor_address: String,
    pub token_balance: f64,
    pub rtmp_url: String,
    pub status: StreamStatus,
    pub created_at: DateTime<Utc>,
    pub testing_started_at: Option<DateTime<Utc>>,
    pub live_started_at: Option<DateTime<Utc>>,
    pub offline_at: Option<DateTime<Utc>>,
    pub stale_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub total_gb_delivered: f64,
    pub total_cost_usd: f64,
    pub platform_fee_usd: f64,
    pub creator_payout_usd: f64,
}

impl Stream {
    /// Create a new stream in the READY state
    pub fn new(
        stream_id: String,
        sponsor_address: String,
        token_balance: f64,
        rtmp_url: String,
    ) -> Self {
        Self {
            id: None,
            stream_id,
            sponsor_address,
            token_balance,
            rtmp_url,
            status: StreamStatus::Ready,
            created_at: Utc::now(),
            testing_started_at: None,
            live_started_at: None,
            offline_at: None,
            stale_at: None,
            archived_at: None,
            total_gb_delivered: 0.0,
            total_cost_usd: 0.0,
            platform_fee_usd: 0.0,
            creator_payout_usd: 0.0,
        }
    }

    /// The lifecycle timestamps in FSM order
    pub fn lifecycle_timestamps(&self) -> [Option<DateTime<Utc>>; 5] {
        [
            self.testing_started_at,
            self.live_started_at,
            self.offline_at,
            self.stale_at,
            self.archived_at,
        ]
    }
}

/// Node model - a volunteer relay reporting heartbeats for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Option<i64>,
    pub node_id: String,
    pub stream_id: String,
    pub stats_url: String,
    /// Relay endpoint advertised by the node itself, preferred over a derived one
    pub relay_url: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: NodeStatus,
    pub created_at: DateTime<Utc>,
}

/// ProbeResult model - one append-only observation of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: Option<i64>,
    pub stream_id: String,
    pub node_id: String,
    pub probe_type: ProbeType,
    pub success: bool,
    pub response_data: Option<String>,
    pub error_message: Option<String>,
    pub probe_timestamp: DateTime<Utc>,
}

impl ProbeResult {
    /// Start a probe record for a node; defaults to a failure until marked otherwise
    pub fn new(node: &Node, probe_type: ProbeType) -> Self {
        Self {
            id: None,
            stream_id: node.stream_id.clone(),
            node_id: node.node_id.clone(),
            probe_type,
            success: false,
            response_data: None,
            error_message: None,
            probe_timestamp: Utc::now(),
        }
    }

    /// Node verified as relaying
    pub fn succeeded(mut self, response_data: Option<String>) -> Self {
        self.success = true;
        self.response_data = response_data;
        self.error_message = None;
        self
    }

    /// Node reachable but not relaying the claimed stream (no error text)
    pub fn not_relaying(mut self, response_data: Option<String>) -> Self {
        self.success = false;
        self.response_data = response_data;
        self.error_message = None;
        self
    }

    /// Node unreachable or protocol failure
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }

    pub fn at(mut self, probe_timestamp: DateTime<Utc>) -> Self {
        self.probe_timestamp = probe_timestamp;
        self
    }
}

/// One history row per successful lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTransition {
    pub stream_id: String,
    pub from_status: StreamStatus,
    pub to_status: StreamStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Per (stream, node) counts over a probe window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTally {
    pub stream_id: String,
    pub node_id: String,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_spot_checks: u64,
}

/// Bandwidth report filed by a node for a session (stream)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthLedger {
    pub id: Option<i64>,
    pub session_id: String,
    pub reporting_node_id: String,
    pub bytes_transferred: i64,
    pub start_interval: DateTime<Utc>,
    pub end_interval: DateTime<Utc>,
    pub source_bitrate_kbps: Option<i64>,
    pub is_verified: bool,
    pub trust_score: Option<f64>,
    pub verification_notes: Option<String>,
    pub report_timestamp: DateTime<Utc>,
}

/// Running economic totals for one node identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: String,
    pub balance_usd: f64,
    pub total_gb_relayed: f64,
    pub earnings_last_30d: f64,
    pub trust_score: f64,
    pub flags: Vec<String>,
    pub last_updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            balance_usd: 0.0,
            total_gb_relayed: 0.0,
            earnings_last_30d: 0.0,
            trust_score: 1.0,
            flags: Vec::new(),
            last_updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_status_parses_case_insensitively() {
        assert_eq!("live".parse::<StreamStatus>(), Ok(StreamStatus::Live));
        assert_eq!("ARCHIVED".parse::<StreamStatus>(), Ok(StreamStatus::Archived));
        assert!("active".parse::<StreamStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_storage_form() {
        assert_eq!(serde_json::to_string(&StreamStatus::Testing).unwrap(), "\"TESTING\"");
        assert_eq!(serde_json::to_string(&NodeStatus::Flagged).unwrap(), "\"flagged\"");
        assert_eq!(serde_json::to_string(&ProbeType::SpotCheck).unwrap(), "\"spot_check\"");
    }

    #[test]
    fn test_timestamp_conversion_truncates_to_seconds() {
        let now = Utc::now();
        let restored = i64_to_timestamp(timestamp_to_i64(now));
        assert_eq!(restored.timestamp(), now.timestamp());
    }

    #[test]
    fn test_new_stream_starts_ready_without_timestamps() {
        let stream = Stream::new("s1".into(), "0xabc".into(), 100.0, "rtmp://src/live/s1".into());
        assert_eq!(stream.status, StreamStatus::Ready);
        assert!(stream.lifecycle_timestamps().iter().all(Option::is_none));
    }
}
