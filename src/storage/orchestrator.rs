//! Create-or-update orchestration for a single sample.
//!
//! Every write opens the series file, updates it and closes it again. When
//! the file does not exist yet it is created from the first matching storage
//! schema and aggregation rule; existing files keep the settings they were
//! created with.

use std::ffi::OsString;
use std::panic::{self, AssertUnwindSafe};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;

use crate::metrics::IngestMetrics;
use crate::policy::PolicyStore;
use crate::protocol::Sample;
use crate::storage::backend::{TimeSeries, TimeSeriesBackend};
use crate::storage::whisper::FILE_SUFFIX;

/// Result of writing one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The point was stored.
    Updated { path: PathBuf, created: bool },
    /// A handle was obtained but the update returned an error.
    UpdateFailed {
        path: PathBuf,
        created: bool,
        error: String,
    },
    /// The backend panicked during the update.
    BackendFault {
        path: PathBuf,
        created: bool,
        message: String,
    },
    /// The file does not exist and no schema matches the metric.
    NoSchema { path: PathBuf },
    /// Opening an existing file failed.
    OpenFailed { path: PathBuf, error: String },
    /// Creating the parent directories or the file failed.
    CreateFailed { path: PathBuf, error: String },
}

impl WriteOutcome {
    /// Whether a series handle was obtained; such samples are counted.
    pub fn obtained_handle(&self) -> bool {
        matches!(
            self,
            Self::Updated { .. } | Self::UpdateFailed { .. } | Self::BackendFault { .. }
        )
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Updated { path, .. }
            | Self::UpdateFailed { path, .. }
            | Self::BackendFault { path, .. }
            | Self::NoSchema { path }
            | Self::OpenFailed { path, .. }
            | Self::CreateFailed { path, .. } => path,
        }
    }
}

/// Map a metric name to its series file under `root`.
///
/// Dots become path separators and the series suffix is appended. The name
/// is appended textually, so it always stays below `root`'s prefix.
pub fn metric_path(root: &Path, metric: &str) -> PathBuf {
    let mut path = OsString::from(root.as_os_str());
    path.push(MAIN_SEPARATOR.to_string());
    path.push(metric.replace('.', &MAIN_SEPARATOR.to_string()));
    path.push(".");
    path.push(FILE_SUFFIX);
    PathBuf::from(path)
}

/// Writes samples into per-metric series files.
pub struct StorageOrchestrator<B> {
    backend: B,
    root: PathBuf,
    policies: Arc<PolicyStore>,
    metrics: Arc<IngestMetrics>,
}

impl<B: TimeSeriesBackend> StorageOrchestrator<B> {
    pub fn new(
        backend: B,
        root: impl Into<PathBuf>,
        policies: Arc<PolicyStore>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            backend,
            root: root.into(),
            policies,
            metrics,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    /// Store one sample, creating its series file if needed.
    ///
    /// Never fails: every problem is logged and reported in the outcome.
    pub fn write(&self, sample: &Sample) -> WriteOutcome {
        let path = metric_path(&self.root, &sample.metric);

        let (series, created) = match self.backend.open(&path) {
            Ok(series) => (series, false),
            Err(e) if e.is_not_found() => match self.create(sample, &path) {
                Ok(series) => (series, true),
                Err(outcome) => return outcome,
            },
            Err(e) => {
                tracing::warn!(metric = %sample.metric, path = %path.display(), error = %e, "Failed to open series file");
                return WriteOutcome::OpenFailed {
                    path,
                    error: e.to_string(),
                };
            }
        };

        let outcome = self.update_and_close(series, sample, path, created);
        self.metrics.metric_received();
        outcome
    }

    fn create(&self, sample: &Sample, path: &Path) -> Result<B::Series, WriteOutcome> {
        let Some(schema) = self.policies.resolve_schema(&sample.metric) else {
            tracing::warn!(metric = %sample.metric, "No storage schema for metric");
            return Err(WriteOutcome::NoSchema {
                path: path.to_path_buf(),
            });
        };
        tracing::debug!(metric = %sample.metric, schema = %schema.name, "Found schema");

        let aggregation = self.policies.aggregation_policy(&sample.metric);

        tracing::info!(
            metric = %sample.metric,
            path = %path.display(),
            retention = %schema.retention_spec,
            schema = %schema.name,
            aggregation_method = %aggregation.method,
            x_files_factor = aggregation.x_files_factor,
            aggregation = %aggregation.section,
            "Creating series file"
        );

        let create_failed = |error: String| WriteOutcome::CreateFailed {
            path: path.to_path_buf(),
            error,
        };

        if let Some(dir) = path.parent()
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to create series directory");
            return Err(create_failed(e.to_string()));
        }

        self.backend
            .create(
                path,
                &schema.retentions,
                aggregation.method,
                aggregation.x_files_factor,
            )
            .map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Failed to create series file");
                create_failed(e.to_string())
            })
    }

    fn update_and_close(
        &self,
        mut series: B::Series,
        sample: &Sample,
        path: PathBuf,
        created: bool,
    ) -> WriteOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            series.update(sample.value, sample.timestamp)
        }));

        let outcome = match result {
            Ok(Ok(())) => {
                tracing::trace!(metric = %sample.metric, value = sample.value, timestamp = sample.timestamp, "Stored point");
                WriteOutcome::Updated { path, created }
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to update series file");
                WriteOutcome::UpdateFailed {
                    path,
                    created,
                    error: e.to_string(),
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(metric = %sample.metric, path = %path.display(), panic = %message, "Recovered from backend panic");
                WriteOutcome::BackendFault {
                    path,
                    created,
                    message,
                }
            }
        };

        match panic::catch_unwind(AssertUnwindSafe(move || series.close())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(path = %outcome.path().display(), error = %e, "Failed to close series file");
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(metric = %sample.metric, path = %outcome.path().display(), panic = %message, "Recovered from backend panic on close");
            }
        }

        outcome
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
