use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("No config path available: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub collector: CollectorConfig,
    pub spot_check: SpotCheckConfig,
    pub reaper: ReaperConfig,
    pub retention: RetentionConfig,
    pub payout: PayoutConfig,
    pub economics: EconomicsConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub retry_backoff_secs: u64,
    pub max_concurrent_polls: usize,
}

/// Connection test used by the spot-check prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotCheckMethod {
    Ffprobe,
    Tcp,
}

impl fmt::Display for SpotCheckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpotCheckMethod::Ffprobe => f.write_str("ffprobe"),
            SpotCheckMethod::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotCheckConfig {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub timeout_secs: u64,
    pub error_backoff_secs: u64,
    pub healthy_window_secs: u64,
    pub relay_port: u16,
    pub relay_application: String,
    pub method: SpotCheckMethod,
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub probe_result_days: u32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    /// Fraction removed from a node's payout per failed spot-check
    pub penalty_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicsConfig {
    pub usd_per_gb: f64,
    pub platform_margin_percent: f64,
    pub creator_revenue_share_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub shutdown_grace_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "streamr-coordinator.db".into(), max_connections: 16 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8000 }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            request_timeout_secs: 10,
            retry_backoff_secs: 5,
            max_concurrent_polls: 64,
        }
    }
}

impl Default for SpotCheckConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 300,
            max_interval_secs: 900,
            timeout_secs: 15,
            error_backoff_secs: 60,
            healthy_window_secs: 300,
            relay_port: 1935,
            relay_application: "live".into(),
            method: SpotCheckMethod::Ffprobe,
            ffprobe_path: "ffprobe".into(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self { interval_secs: 120, stale_after_secs: 300 }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { probe_result_days: 7, interval_secs: 86_400 }
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self { penalty_factor: 0.5 }
    }
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self { usd_per_gb: 0.20, platform_margin_percent: 7.5, creator_revenue_share_percent: 87.5 }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { shutdown_grace_secs: 20 }
    }
}

/// Upper bound for windows subtracted from the current time
const MAX_LOOKBACK_SECS: u64 = 10 * 365 * 24 * 60 * 60;
const MAX_RETENTION_DAYS: u32 = 10 * 365;

impl CollectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl SpotCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn healthy_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.healthy_window_secs as i64)
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/streamr/coordinator.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("streamr/coordinator.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Coordinator Configuration:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Max Connections", &self.database.max_connections)?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;
        write_title_1(f, "Stats Collector")?;
        write_1(f, "Poll Interval (s)", &self.collector.poll_interval_secs)?;
        write_1(f, "Request Timeout (s)", &self.collector.request_timeout_secs)?;
        write_1(f, "Max Concurrent Polls", &self.collector.max_concurrent_polls)?;
        write_title_1(f, "Spot Check")?;
        write_1(
            f,
            "Interval (s)",
            &format!("{}-{}", self.spot_check.min_interval_secs, self.spot_check.max_interval_secs),
        )?;
        write_1(f, "Method", &self.spot_check.method)?;
        write_1(f, "Timeout (s)", &self.spot_check.timeout_secs)?;
        write_1(
            f,
            "Relay Convention",
            &format!("{}/{}", self.spot_check.relay_port, self.spot_check.relay_application),
        )?;
        write_title_1(f, "Reaper")?;
        write_1(f, "Interval (s)", &self.reaper.interval_secs)?;
        write_1(f, "Stale After (s)", &self.reaper.stale_after_secs)?;
        write_title_1(f, "Retention")?;
        write_1(f, "Probe Results (days)", &self.retention.probe_result_days)?;
        write_title_1(f, "Payout")?;
        write_1(f, "Penalty Factor", &self.payout.penalty_factor)?;
        write_title_1(f, "Economics")?;
        write_1(f, "USD per GB", &self.economics.usd_per_gb)?;
        write_1(f, "Platform Margin (%)", &self.economics.platform_margin_percent)?;
        write_1(f, "Creator Share (%)", &self.economics.creator_revenue_share_percent)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/streamr/coordinator.toml
    /// or the specified path if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply `STREAMR_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var("STREAMR_DATABASE_PATH") {
            self.database.path = path.into();
        }
        if let Ok(bind) = env::var("STREAMR_BIND") {
            self.server.bind = bind;
        }
        if let Ok(port) = env::var("STREAMR_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Invalid {
                key: "STREAMR_PORT",
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        Ok(())
    }

    /// Reject settings the loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, reason: &str| ConfigError::Invalid { key, reason: reason.to_string() };

        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be at least 1"));
        }
        if self.collector.poll_interval_secs == 0 {
            return Err(invalid("collector.poll_interval_secs", "must be positive"));
        }
        if self.collector.request_timeout_secs == 0 {
            return Err(invalid("collector.request_timeout_secs", "must be positive"));
        }
        if self.collector.max_concurrent_polls == 0 {
            return Err(invalid("collector.max_concurrent_polls", "must be at least 1"));
        }
        if self.spot_check.min_interval_secs == 0 {
            return Err(invalid("spot_check.min_interval_secs", "must be positive"));
        }
        if self.spot_check.min_interval_secs > self.spot_check.max_interval_secs {
            return Err(invalid("spot_check.min_interval_secs", "must not exceed max_interval_secs"));
        }
        if self.spot_check.timeout_secs == 0 {
            return Err(invalid("spot_check.timeout_secs", "must be positive"));
        }
        if !(1..=MAX_LOOKBACK_SECS).contains(&self.spot_check.healthy_window_secs) {
            return Err(invalid("spot_check.healthy_window_secs", "must be between 1 second and 10 years"));
        }
        if self.reaper.interval_secs == 0 {
            return Err(invalid("reaper.interval_secs", "must be positive"));
        }
        if !(1..=MAX_LOOKBACK_SECS).contains(&self.reaper.stale_after_secs) {
            return Err(invalid("reaper.stale_after_secs", "must be between 1 second and 10 years"));
        }
        if self.retention.interval_secs == 0 {
            return Err(invalid("retention.interval_secs", "must be positive"));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention.probe_result_days) {
            return Err(invalid("retention.probe_result_days", "must be between 1 and 3650"));
        }
        if !(0.0..=1.0).contains(&self.payout.penalty_factor) {
            return Err(invalid("payout.penalty_factor", "must be within [0, 1]"));
        }
        if self.economics.usd_per_gb < 0.0 {
            return Err(invalid("economics.usd_per_gb", "must not be negative"));
        }
        Ok(())
    }
}
