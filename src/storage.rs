//! Storage Layer
//!
//! One fixed-size round-robin file per metric, addressed by metric name:
//!
//! - [`TimeSeriesBackend`] / [`TimeSeries`]: open/create/update/close seam
//! - [`WhisperBackend`]: bundled Whisper-format implementation
//! - [`StorageOrchestrator`]: create-or-update for one sample, with policy
//!   resolution on creation and containment of backend panics
//! - [`parse_retention_defs`]: `precision:duration` archive definitions

mod backend;
mod error;
mod orchestrator;
mod retention;
mod types;
mod whisper;

pub use backend::{TimeSeries, TimeSeriesBackend};
pub use error::BackendError;
pub use orchestrator::{StorageOrchestrator, WriteOutcome, metric_path};
pub(crate) use orchestrator::panic_message;
pub use retention::{parse_retention_def, parse_retention_defs};
pub use types::{AggregationMethod, Point, Retention};
pub use whisper::{Clock, FILE_SUFFIX, WhisperBackend, WhisperFile};
