//! Configuration module for metricd.
//!
//! Layered configuration: built-in defaults, then an optional YAML file,
//! then CLI flags and environment variables (applied by the binary).
//! Sections:
//! - Ingest and stats listeners (bind address, port)
//! - Storage root and policy file paths
//! - Runtime sizing, logging and Graphite telemetry

mod app;
mod validation;

pub use app::{
    AppConfig, IngestConfig, LoggingConfig, PolicyConfig, RuntimeConfig, StatsConfig,
    StorageConfig, TelemetryConfig, default_worker_threads,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_AGGREGATION_FILE, DEFAULT_INGEST_PORT, DEFAULT_SCHEMA_FILE, DEFAULT_STATS_PORT,
    DEFAULT_STORAGE_ROOT, DEFAULT_TELEMETRY_INTERVAL, DEFAULT_TELEMETRY_TIMEOUT,
};
