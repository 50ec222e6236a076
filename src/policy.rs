//! Policy Store
//!
//! Two ordered rule lists loaded once at startup and read-only afterwards:
//!
//! - [`StorageSchema`]: retention applied when a series file is created (mandatory)
//! - [`StorageAggregation`]: rollup method and xFilesFactor (optional file, defaulted when unmatched)
//!
//! Both lists resolve with first-match-wins in file order; later matches are
//! never considered.

mod aggregation;
mod error;
mod loader;
mod schema;

use std::path::Path;

pub use aggregation::{DEFAULT_X_FILES_FACTOR, StorageAggregation, load_aggregations};
pub use error::PolicyError;
pub use loader::{PolicyFile, Section};
pub use schema::{StorageSchema, load_schemas};

use crate::storage::AggregationMethod;

/// Section label reported when no aggregation rule matched.
pub const DEFAULT_AGGREGATION_SECTION: &str = "(default)";

/// Aggregation settings applied to a new series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationPolicy<'a> {
    /// Matching section name, or [`DEFAULT_AGGREGATION_SECTION`].
    pub section: &'a str,
    pub method: AggregationMethod,
    pub x_files_factor: f32,
}

impl AggregationPolicy<'static> {
    /// `{average, 0.5}`, used when no rule matches.
    pub const DEFAULT: Self = Self {
        section: DEFAULT_AGGREGATION_SECTION,
        method: AggregationMethod::Average,
        x_files_factor: DEFAULT_X_FILES_FACTOR,
    };
}

impl<'a> From<&'a StorageAggregation> for AggregationPolicy<'a> {
    fn from(rule: &'a StorageAggregation) -> Self {
        Self {
            section: &rule.name,
            method: rule.method,
            x_files_factor: rule.x_files_factor,
        }
    }
}

/// Immutable schema and aggregation lists.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    schemas: Vec<StorageSchema>,
    aggregations: Vec<StorageAggregation>,
}

impl PolicyStore {
    pub fn new(schemas: Vec<StorageSchema>, aggregations: Vec<StorageAggregation>) -> Self {
        Self {
            schemas,
            aggregations,
        }
    }

    /// Load both policy files.
    ///
    /// The schema file is mandatory. A missing aggregation file (or `None`)
    /// yields an empty rule list; any other read failure is an error.
    pub fn load(schema_file: &Path, aggregation_file: Option<&Path>) -> Result<Self, PolicyError> {
        let schemas = load_schemas(schema_file)?;

        let aggregations = match aggregation_file {
            None => Vec::new(),
            Some(path) => match load_aggregations(path) {
                Ok(rules) => rules,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        path = %path.display(),
                        "Aggregation file not found, using defaults for all metrics"
                    );
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
        };

        if schemas.is_empty() {
            tracing::warn!(
                path = %schema_file.display(),
                "No usable storage schemas, new metrics will be dropped"
            );
        }

        Ok(Self::new(schemas, aggregations))
    }

    pub fn schemas(&self) -> &[StorageSchema] {
        &self.schemas
    }

    pub fn aggregations(&self) -> &[StorageAggregation] {
        &self.aggregations
    }

    /// First schema whose pattern matches `metric`.
    pub fn resolve_schema(&self, metric: &str) -> Option<&StorageSchema> {
        self.schemas.iter().find(|s| s.matches(metric))
    }

    /// First aggregation rule whose pattern matches `metric`.
    pub fn resolve_aggregation(&self, metric: &str) -> Option<&StorageAggregation> {
        self.aggregations.iter().find(|a| a.matches(metric))
    }

    /// Matching aggregation rule, or [`AggregationPolicy::DEFAULT`].
    pub fn aggregation_policy(&self, metric: &str) -> AggregationPolicy<'_> {
        self.resolve_aggregation(metric)
            .map(AggregationPolicy::from)
            .unwrap_or(AggregationPolicy::DEFAULT)
    }
}
