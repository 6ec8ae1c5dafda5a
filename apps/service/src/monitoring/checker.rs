use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::time::timeout;
use url::Url;

use super::types::FfprobeOutput;
use crate::config::{SpotCheckConfig, SpotCheckMethod};
use crate::database::models::Node;

/// Why a probe did not confirm a node.
///
/// Never returned to API callers; rendered into a probe result's
/// `error_message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("Timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to launch probe: {0}")]
    Spawn(String),
}

/// Fetches a node's self-reported stats
#[async_trait::async_trait]
pub trait StatsFetcher: Send + Sync {
    /// Body of a 200 response; anything else is a failure
    async fn fetch(&self, stats_url: &str) -> Result<String, ProbeFailure>;
}

/// reqwest-backed stats fetcher
pub struct HttpStatsFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpStatsFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("streamr-coordinator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }
}

#[async_trait::async_trait]
impl StatsFetcher for HttpStatsFetcher {
    async fn fetch(&self, stats_url: &str) -> Result<String, ProbeFailure> {
        let response = self.client.get(stats_url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeFailure::Timeout(self.timeout)
            } else {
                ProbeFailure::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProbeFailure::HttpStatus(status.as_u16()));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProbeFailure::Timeout(self.timeout)
            } else {
                ProbeFailure::Transport(e.to_string())
            }
        })
    }
}

/// Where a node is expected to serve the relayed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub url: String,
    pub host: String,
    pub port: u16,
}

/// Resolve the relay endpoint for a node.
///
/// A node-advertised `relay_url` wins; otherwise the endpoint is derived from
/// the stats URL host and the configured port/application convention.
pub fn relay_endpoint(node: &Node, config: &SpotCheckConfig) -> Result<RelayEndpoint, ProbeFailure> {
    if let Some(relay_url) = node.relay_url.as_deref() {
        let url = Url::parse(relay_url)
            .map_err(|e| ProbeFailure::Protocol(format!("Invalid relay URL {relay_url}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProbeFailure::Protocol(format!("Relay URL {relay_url} has no host")))?;

        return Ok(RelayEndpoint {
            url: relay_url.to_string(),
            host: host.to_string(),
            port: url.port().unwrap_or(config.relay_port),
        });
    }

    let stats = Url::parse(&node.stats_url)
        .map_err(|e| ProbeFailure::Protocol(format!("Invalid stats URL {}: {e}", node.stats_url)))?;
    let host = stats
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProbeFailure::Protocol(format!("Stats URL {} has no host", node.stats_url)))?;

    Ok(RelayEndpoint {
        url: format!(
            "rtmp://{host}:{}/{}/{}",
            config.relay_port, config.relay_application, node.stream_id
        ),
        host: host.to_string(),
        port: config.relay_port,
    })
}

/// Protocol-level check that a node is really relaying
#[async_trait::async_trait]
pub trait RelayProber: Send + Sync {
    /// Short description of what was observed on success
    async fn probe(&self, endpoint: &RelayEndpoint) -> Result<String, ProbeFailure>;
}

/// Build the prober selected in configuration
pub fn relay_prober(config: &SpotCheckConfig) -> Box<dyn RelayProber> {
    match config.method {
        SpotCheckMethod::Ffprobe => Box::new(FfprobeProber::new(config.ffprobe_path.clone(), config.timeout())),
        SpotCheckMethod::Tcp => Box::new(TcpProber::new(config.timeout())),
    }
}

/// Runs `ffprobe` against the relay endpoint and requires stream metadata
/// How much of ffprobe's stderr is kept on a failed probe
const STDERR_TAIL_CHARS: usize = 300;

pub struct FfprobeProber {
    program: String,
    timeout_duration: Duration,
}

impl FfprobeProber {
    pub fn new(program: String, timeout_duration: Duration) -> Self {
        Self { program, timeout_duration }
    }

    /// Socket timeout handed to ffprobe, in microseconds; shorter than the
    /// outer deadline so ffprobe can report its own failure first
    fn socket_timeout_micros(&self) -> u128 {
        (self.timeout_duration * 2 / 3).as_micros().max(1)
    }
}

/// Check ffprobe's JSON for at least one media stream and summarize it
pub fn parse_ffprobe_output(stdout: &[u8]) -> Result<String, ProbeFailure> {
    let output: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ProbeFailure::Protocol(format!("Unreadable ffprobe output: {e}")))?;

    let streams = output.streams.unwrap_or_default();
    if streams.is_empty() {
        return Err(ProbeFailure::Protocol("No media streams found".to_string()));
    }

    let tracks: Vec<String> = streams
        .iter()
        .map(|s| {
            format!(
                "{}:{}",
                s.codec_type.as_deref().unwrap_or("unknown"),
                s.codec_name.as_deref().unwrap_or("unknown")
            )
        })
        .collect();

    Ok(format!("{} stream(s): {}", streams.len(), tracks.join(", ")))
}

/// Last `STDERR_TAIL_CHARS` characters of a diagnostic stream, trimmed
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    text.chars().skip(skip).collect()
}

#[async_trait::async_trait]
impl RelayProber for FfprobeProber {
    async fn probe(&self, endpoint: &RelayEndpoint) -> Result<String, ProbeFailure> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-timeout"])
            .arg(self.socket_timeout_micros().to_string())
            .arg(&endpoint.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout_duration, command.output())
            .await
            .map_err(|_| ProbeFailure::Timeout(self.timeout_duration))?
            .map_err(|e| ProbeFailure::Spawn(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            let detail = if stderr.is_empty() {
                format!("ffprobe exited with {}", output.status)
            } else {
                format!("ffprobe exited with {}: {stderr}", output.status)
            };
            return Err(ProbeFailure::Protocol(detail));
        }

        parse_ffprobe_output(&output.stdout)
    }
}

/// Bare TCP connect to the relay port, for hosts without ffmpeg
pub struct TcpProber {
    timeout_duration: Duration,
}

impl TcpProber {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }
}

#[async_trait::async_trait]
impl RelayProber for TcpProber {
    async fn probe(&self, endpoint: &RelayEndpoint) -> Result<String, ProbeFailure> {
        let connect = tokio::net::TcpStream::connect((endpoint.host.as_str(), endpoint.port));

        timeout(self.timeout_duration, connect)
            .await
            .map_err(|_| ProbeFailure::Timeout(self.timeout_duration))?
            .map_err(|e| ProbeFailure::Transport(format!("TCP connection failed: {e}")))?;

        Ok(format!("TCP connect to {}:{} succeeded", endpoint.host, endpoint.port))
    }
}
