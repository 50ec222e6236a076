//! Storage schemas: which retention a new series is created with.

use std::path::Path;

use regex::Regex;

use super::error::PolicyError;
use super::loader::{PolicyFile, Section};
use crate::storage::{Retention, parse_retention_defs};

/// A named pattern-to-retention mapping.
#[derive(Debug, Clone)]
pub struct StorageSchema {
    /// Section name.
    pub name: String,
    /// Searched (not full-matched) against metric names.
    pub pattern: Regex,
    /// Archive definitions, finest first.
    pub retentions: Vec<Retention>,
    /// Retention spec as written in the file.
    pub retention_spec: String,
}

impl StorageSchema {
    /// Build a schema from a `pattern` / `retentions` section.
    pub fn from_section(section: &Section<'_>) -> Result<Self, PolicyError> {
        let name = section.name.to_string();

        let pattern = section.get("pattern").ok_or_else(|| PolicyError::MissingKey {
            section: name.clone(),
            key: "pattern",
        })?;
        let pattern = Regex::new(pattern).map_err(|source| PolicyError::InvalidPattern {
            section: name.clone(),
            pattern: pattern.to_string(),
            source,
        })?;

        let retention_spec = section
            .get("retentions")
            .ok_or_else(|| PolicyError::MissingKey {
                section: name.clone(),
                key: "retentions",
            })?
            .to_string();
        let retentions =
            parse_retention_defs(&retention_spec).map_err(|source| {
                PolicyError::InvalidRetentions {
                    section: name.clone(),
                    source,
                }
            })?;

        Ok(Self {
            name,
            pattern,
            retentions,
            retention_spec,
        })
    }

    pub fn matches(&self, metric: &str) -> bool {
        self.pattern.is_match(metric)
    }
}

/// Load all valid schema sections of a file, in order.
///
/// Invalid sections are logged and skipped. Only an unreadable file is an error.
pub fn load_schemas(path: &Path) -> Result<Vec<StorageSchema>, PolicyError> {
    let file = PolicyFile::read(path)?;
    Ok(schemas_from(&file))
}

pub(crate) fn schemas_from(file: &PolicyFile) -> Vec<StorageSchema> {
    file.sections()
        .filter_map(|section| match StorageSchema::from_section(&section) {
            Ok(schema) => {
                tracing::debug!(
                    schema = %schema.name,
                    pattern = %schema.pattern,
                    retentions = %schema.retention_spec,
                    "Adding storage schema"
                );
                Some(schema)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping storage schema section");
                None
            }
        })
        .collect()
}
