//! metricd - plaintext metric ingestion daemon
//!
//! Accepts `<metric> <value> <timestamp>\n` records over TCP and writes each
//! sample into a per-metric Whisper round-robin file. New files take their
//! retention from the first matching storage schema and their rollup
//! behaviour from the first matching aggregation rule.
//!
//! # Architecture
//!
//! - **Ingest**: TCP listener, one task per connection
//! - **Protocol**: line decoder producing validated samples
//! - **Policy**: ordered storage schemas and aggregation rules (INI)
//! - **Storage**: create-or-update orchestration over a pluggable backend,
//!   with a bundled Whisper implementation
//! - **Server / Telemetry**: stats endpoint and Graphite self-reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use metricd::{IngestListener, IngestMetrics, PolicyStore, StorageOrchestrator, WhisperBackend};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policies = PolicyStore::load(
//!     "/etc/carbon/storage-schemas.conf".as_ref(),
//!     Some("/etc/carbon/storage-aggregation.conf".as_ref()),
//! )?;
//! let orchestrator = Arc::new(StorageOrchestrator::new(
//!     WhisperBackend::new(),
//!     "/var/lib/carbon/whisper",
//!     Arc::new(policies),
//!     Arc::new(IngestMetrics::new()),
//! ));
//! IngestListener::bind("0.0.0.0:2003", orchestrator).await?.run().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ingest;
pub mod metrics;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use ingest::{ConnectionHandler, IngestError, IngestListener};
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use policy::{PolicyError, PolicyStore, StorageAggregation, StorageSchema};
pub use protocol::{DecodeError, Sample, decode_line};
pub use storage::{
    AggregationMethod, BackendError, Retention, StorageOrchestrator, TimeSeries,
    TimeSeriesBackend, WhisperBackend, WriteOutcome,
};
