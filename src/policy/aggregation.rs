//! Storage aggregation rules: how a new series rolls points up.

use std::path::Path;

use regex::Regex;

use super::error::PolicyError;
use super::loader::{PolicyFile, Section};
use crate::storage::AggregationMethod;

/// xFilesFactor of the default policy.
pub const DEFAULT_X_FILES_FACTOR: f32 = 0.5;

/// A named pattern-to-aggregation mapping.
#[derive(Debug, Clone)]
pub struct StorageAggregation {
    /// Section name.
    pub name: String,
    pub pattern: Regex,
    /// Fraction of known points required to propagate, in `[0, 1]`.
    pub x_files_factor: f32,
    pub method: AggregationMethod,
}

impl StorageAggregation {
    /// Build a rule from a `pattern` / `xFilesFactor` / `aggregationMethod` section.
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

        let missing = |key: &'static str| PolicyError::MissingKey {
            section: name.clone(),
            key,
        };

        let value = section
            .get("xFilesFactor")
            .ok_or_else(|| missing("xFilesFactor"))?;
        let x_files_factor = value
            .parse::<f32>()
            .ok()
            .filter(|xff| (0.0..=1.0).contains(xff))
            .ok_or_else(|| PolicyError::InvalidXFilesFactor {
                section: name.clone(),
                value: value.to_string(),
            })?;

        let value = section
            .get("aggregationMethod")
            .ok_or_else(|| missing("aggregationMethod"))?;
        let method = value
            .parse()
            .map_err(|_| PolicyError::UnknownAggregationMethod {
                section: name.clone(),
                value: value.to_string(),
            })?;

        Ok(Self {
            name,
            pattern,
            x_files_factor,
            method,
        })
    }

    pub fn matches(&self, metric: &str) -> bool {
        self.pattern.is_match(metric)
    }
}

/// Load all valid aggregation sections of a file, in order.
///
/// Invalid sections are logged and skipped. Only an unreadable file is an error.
pub fn load_aggregations(path: &Path) -> Result<Vec<StorageAggregation>, PolicyError> {
    let file = PolicyFile::read(path)?;
    Ok(aggregations_from(&file))
}

pub(crate) fn aggregations_from(file: &PolicyFile) -> Vec<StorageAggregation> {
    file.sections()
        .filter_map(|section| match StorageAggregation::from_section(&section) {
            Ok(aggregation) => {
                tracing::debug!(
                    aggregation = %aggregation.name,
                    pattern = %aggregation.pattern,
                    method = %aggregation.method,
                    x_files_factor = aggregation.x_files_factor,
                    "Adding storage aggregation"
                );
                Some(aggregation)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping storage aggregation section");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Vec<StorageAggregation> {
        aggregations_from(&PolicyFile::parse(content).unwrap())
    }

    #[test]
    fn test_aggregation_section_valid() {
        let rules = parse(
            "[min]\npattern = \\.min$\nxFilesFactor = 0.1\naggregationMethod = min\n",
        );
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "min");
        assert_eq!(rules[0].method, AggregationMethod::Min);
        assert_eq!(rules[0].x_files_factor, 0.1);
        assert!(rules[0].matches("requests.latency.min"));
        assert!(!rules[0].matches("requests.min.latency"));
    }

    #[test]
    fn test_avg_alias() {
        let rules = parse("[a]\npattern = .*\nxFilesFactor = 0\naggregationMethod = avg\n");
        assert_eq!(rules[0].method, AggregationMethod::Average);
        assert_eq!(rules[0].x_files_factor, 0.0);
    }

    #[test]
    fn test_unknown_method_skips_only_that_section() {
        let rules = parse(
            "[bogus]\npattern = .*\nxFilesFactor = 0.5\naggregationMethod = median\n\n\
             [sum]\npattern = \\.count$\nxFilesFactor = 0\naggregationMethod = sum\n\n\
             [max]\npattern = \\.max$\nxFilesFactor = 0.1\naggregationMethod = max\n",
        );
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["sum", "max"]);
    }

    #[test]
    fn test_invalid_x_files_factor_skipped() {
        let rules = parse(
            "[nan]\npattern = .*\nxFilesFactor = lots\naggregationMethod = sum\n\n\
             [range]\npattern = .*\nxFilesFactor = 1.5\naggregationMethod = sum\n",
        );
        assert!(rules.is_empty());
    }

    #[test]
    fn test_sections_missing_keys_are_skipped() {
        let rules = parse(
            "[bare]\npattern = .*\n\n\
             [no_method]\npattern = .*\nxFilesFactor = 0.2\n\n\
             [no_xff]\npattern = .*\naggregationMethod = max\n\n\
             [sum]\npattern = \\.count$\nxFilesFactor = 0\naggregationMethod = sum\n",
        );
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["sum"]);

        let file = PolicyFile::parse("[no_xff]\npattern = .*\naggregationMethod = max\n").unwrap();
        let err = StorageAggregation::from_section(&file.sections().next().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::MissingKey {
                key: "xFilesFactor",
                ..
            }
        ));
    }
}
