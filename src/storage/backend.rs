//! Backend contract consumed by the storage orchestrator.
//!
//! A backend opens and creates per-metric series files. A series handle
//! accepts point updates and is closed after each sample; no handle outlives
//! a single write.

use std::path::Path;

use crate::storage::BackendError;
use crate::storage::types::{AggregationMethod, Retention};

/// Time-series file engine (Open/Create).
pub trait TimeSeriesBackend: Send + Sync + 'static {
    /// Open series handle type.
    type Series: TimeSeries;

    /// Open an existing series.
    ///
    /// Must fail with an error for which [`BackendError::is_not_found`] holds
    /// when the file does not exist.
    fn open(&self, path: &Path) -> Result<Self::Series, BackendError>;

    /// Create a new series. Parent directories must already exist.
    fn create(
        &self,
        path: &Path,
        retentions: &[Retention],
        method: AggregationMethod,
        x_files_factor: f32,
    ) -> Result<Self::Series, BackendError>;
}

/// An open series handle (Update/Close).
pub trait TimeSeries {
    /// Store one point.
    fn update(&mut self, value: f64, timestamp: i64) -> Result<(), BackendError>;

    /// Release the handle.
    fn close(self) -> Result<(), BackendError>;
}
