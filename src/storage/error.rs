//! Storage backend error types.
//!
//! All backend operations return [`BackendError`] on failure. The orchestrator
//! only needs to tell "file does not exist" apart from everything else, see
//! [`BackendError::is_not_found`].

use std::io::ErrorKind;

use thiserror::Error;

/// Errors that can occur in a time-series backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Underlying file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A retention definition could not be parsed.
    #[error("invalid retention '{spec}': {reason}")]
    InvalidRetention { spec: String, reason: String },

    /// The archive list violates the format constraints.
    #[error("invalid archive list: {0}")]
    InvalidArchives(String),

    /// xFilesFactor outside `[0, 1]`.
    #[error("invalid xFilesFactor {0}, expected a value in [0, 1]")]
    InvalidXFilesFactor(f32),

    /// The file header is unreadable or inconsistent.
    #[error("corrupt file: {0}")]
    Corrupt(String),

    /// The timestamp falls outside the span covered by the archives.
    #[error("timestamp {timestamp} not covered by any archive (now: {now})")]
    TimestampNotCovered { timestamp: i64, now: i64 },
}

impl BackendError {
    /// Whether the error means the series file does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == ErrorKind::NotFound)
    }
}
