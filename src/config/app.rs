//! Application configuration structures.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default plaintext ingest port.
pub const DEFAULT_INGEST_PORT: u16 = 2003;

/// Default stats endpoint port.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Default Whisper storage root.
pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/carbon/whisper";

/// Default storage schema file.
pub const DEFAULT_SCHEMA_FILE: &str = "/etc/carbon/storage-schemas.conf";

/// Default storage aggregation file.
pub const DEFAULT_AGGREGATION_FILE: &str = "/etc/carbon/storage-aggregation.conf";

/// Default telemetry reporting interval (60 seconds).
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Default telemetry connect/write timeout (10 seconds).
pub const DEFAULT_TELEMETRY_TIMEOUT: Duration = Duration::from_secs(10);

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_telemetry_interval() -> Duration {
    DEFAULT_TELEMETRY_INTERVAL
}

fn default_telemetry_timeout() -> Duration {
    DEFAULT_TELEMETRY_TIMEOUT
}

/// 80% of available CPUs, at least one.
pub fn default_worker_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 8 / 10).max(1)
}

// =============================================================================
// Listener Configuration
// =============================================================================

/// Plaintext ingest listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Bind address (default: "0.0.0.0").
    pub bind: String,

    /// Port (default: 2003).
    pub port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: DEFAULT_INGEST_PORT,
        }
    }
}

impl IngestConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Stats HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Bind address (default: "0.0.0.0").
    pub bind: String,

    /// Port (default: 8080).
    pub port: u16,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: DEFAULT_STATS_PORT,
        }
    }
}

impl StatsConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// =============================================================================
// Storage & Policy Configuration
// =============================================================================

/// Series file storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for series files.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_STORAGE_ROOT),
        }
    }
}

/// Policy file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Storage schemas (mandatory).
    pub schema_file: PathBuf,

    /// Storage aggregation rules (optional; missing file means defaults).
    pub aggregation_file: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            schema_file: PathBuf::from(DEFAULT_SCHEMA_FILE),
            aggregation_file: Some(PathBuf::from(DEFAULT_AGGREGATION_FILE)),
        }
    }
}

// =============================================================================
// Runtime & Logging Configuration
// =============================================================================

/// Tokio runtime sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads (default: 80% of CPUs, minimum 1).
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (default: "info").
    pub level: String,

    /// Directory for a daily-rolling `metricd.log`.
    pub dir: Option<PathBuf>,

    /// Also log to stdout when `dir` is set.
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            stdout: false,
        }
    }
}

// =============================================================================
// Telemetry Configuration
// =============================================================================

/// Graphite telemetry push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `host:port` of a Graphite plaintext listener; disabled when unset.
    pub graphite_host: Option<String>,

    /// Reporting interval (default: 60s).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Connect/write timeout (default: 10s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            graphite_host: None,
            interval: default_telemetry_interval(),
            timeout: default_telemetry_timeout(),
        }
    }
}

impl TelemetryConfig {
    /// Fill `graphite_host` from `GRAPHITEHOST` / `GRAPHITEPORT` when unset.
    pub fn apply_env(&mut self) {
        if self.graphite_host.is_some() {
            return;
        }
        if let Ok(host) = std::env::var("GRAPHITEHOST")
            && !host.is_empty()
        {
            let port = std::env::var("GRAPHITEPORT").unwrap_or_else(|_| "2003".to_string());
            self.graphite_host = Some(format!("{host}:{port}"));
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub stats: StatsConfig,
    pub storage: StorageConfig,
    pub policy: PolicyConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML configuration text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Strip trailing separators from the storage root.
    pub fn normalize(&mut self) {
        let root = self.storage.root.to_string_lossy();
        let trimmed = root.trim_end_matches('/');
        if trimmed.len() != root.len() && !trimmed.is_empty() {
            self.storage.root = PathBuf::from(trimmed);
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_listener("ingest", &self.ingest.bind, self.ingest.port)?;
        validate_listener("stats", &self.stats.bind, self.stats.port)?;

        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage root must not be empty".to_string(),
            ));
        }

        if self.policy.schema_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "policy schema_file must not be empty".to_string(),
            ));
        }

        if self.runtime.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "runtime worker_threads must be positive".to_string(),
            ));
        }

        if self.telemetry.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "telemetry interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_listener(name: &str, bind: &str, port: u16) -> Result<(), ConfigError> {
    bind.parse::<IpAddr>().map_err(|_| {
        ConfigError::ValidationError(format!("invalid {name} bind address: '{bind}'"))
    })?;

    if port == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{name} port must be non-zero"
        )));
    }
    Ok(())
}
