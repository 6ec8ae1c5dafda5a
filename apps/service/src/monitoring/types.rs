use serde::{Deserialize, Serialize};

/// Connection states that count as actively relaying
pub const ACTIVE_CONNECTION_STATES: [&str; 3] = ["publishing", "streaming", "connected"];

/// Body of a node's stats endpoint.
///
/// Every field is optional; a missing or null list reads as empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsReport {
    #[serde(default)]
    pub streams: Option<Vec<StreamStats>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStats {
    #[serde(default)]
    pub stream_name: Option<String>,
    #[serde(default)]
    pub connections: Option<Vec<ConnectionStats>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    #[serde(default)]
    pub state: Option<String>,
}

impl ConnectionStats {
    pub fn is_active(&self) -> bool {
        self.state
            .as_deref()
            .map(|state| ACTIVE_CONNECTION_STATES.contains(&state.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

impl StatsReport {
    /// Whether the report shows `stream_id` being relayed.
    ///
    /// A stream entry matches when its name contains `stream_id`
    /// (case-sensitive), and it must carry at least one active connection.
    pub fn is_relaying(&self, stream_id: &str) -> bool {
        self.streams.iter().flatten().any(|stream| {
            let name_matches = stream.stream_name.as_deref().is_some_and(|name| name.contains(stream_id));
            name_matches && stream.connections.iter().flatten().any(ConnectionStats::is_active)
        })
    }
}

/// Verdict of one stats poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollVerdict {
    Relaying,
    NotRelaying,
    Unreachable,
}

/// Counts for one collector round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub polled: usize,
    pub relaying: usize,
    pub not_relaying: usize,
    pub unreachable: usize,
    /// Probe results that could not be written
    pub unrecorded: usize,
}

impl RoundSummary {
    pub fn record(&mut self, verdict: PollVerdict) {
        self.polled += 1;
        match verdict {
            PollVerdict::Relaying => self.relaying += 1,
            PollVerdict::NotRelaying => self.not_relaying += 1,
            PollVerdict::Unreachable => self.unreachable += 1,
        }
    }
}

/// Result of one spot-check cycle that found a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotCheckOutcome {
    pub node_id: String,
    pub stream_id: String,
    pub endpoint: Option<String>,
    pub passed: bool,
    pub detail: String,
}

/// `ffprobe -print_format json -show_streams` output, reduced to what we inspect
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Option<Vec<FfprobeStream>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
}
