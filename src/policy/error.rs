//! Policy loading errors.

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

use crate::storage::BackendError;

/// Errors raised while loading policy files.
///
/// Only [`PolicyError::Read`] fails a whole file; the other variants describe
/// a single section, which is skipped with a warning.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The file could not be read or is not valid INI.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// A required key is absent from a section.
    #[error("[{section}]: missing '{key}'")]
    MissingKey { section: String, key: &'static str },

    /// The `pattern` value is not a valid regular expression.
    #[error("[{section}]: failed to parse pattern '{pattern}': {source}")]
    InvalidPattern {
        section: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The `retentions` value was rejected by the backend parser.
    #[error("[{section}]: {source}")]
    InvalidRetentions {
        section: String,
        #[source]
        source: BackendError,
    },

    /// The `xFilesFactor` value is not a number in `[0, 1]`.
    #[error("[{section}]: invalid xFilesFactor '{value}'")]
    InvalidXFilesFactor { section: String, value: String },

    /// The `aggregationMethod` value is not recognized.
    #[error("[{section}]: unknown aggregation method '{value}'")]
    UnknownAggregationMethod { section: String, value: String },
}

impl PolicyError {
    /// Whether the policy file itself does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Read {
                source: ini::Error::Io(e),
                ..
            } if e.kind() == ErrorKind::NotFound
        )
    }
}
