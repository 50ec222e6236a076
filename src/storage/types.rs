//! Core data types shared by the storage backends.
//!
//! - [`AggregationMethod`]: rollup function applied when consolidating points
//! - [`Retention`]: one `(seconds per point, point count)` archive definition
//! - [`Point`]: a single stored `(interval, value)` pair

use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};

/// Rollup function used when consolidating fine points into coarser archives.
///
/// Parsed from the `aggregationMethod` key of an aggregation section.
/// `avg` is accepted as an alias of `average`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    /// Arithmetic mean of the known points.
    #[default]
    #[strum(to_string = "average", serialize = "avg")]
    Average,
    /// Sum of the known points.
    #[strum(to_string = "sum")]
    Sum,
    /// Most recent known point.
    #[strum(to_string = "last")]
    Last,
    /// Largest known point.
    #[strum(to_string = "max")]
    Max,
    /// Smallest known point.
    #[strum(to_string = "min")]
    Min,
}

impl AggregationMethod {
    /// On-disk type code used in the Whisper header.
    pub fn code(self) -> u32 {
        match self {
            Self::Average => 1,
            Self::Sum => 2,
            Self::Last => 3,
            Self::Max => 4,
            Self::Min => 5,
        }
    }

    /// Inverse of [`AggregationMethod::code`].
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Average),
            2 => Some(Self::Sum),
            3 => Some(Self::Last),
            4 => Some(Self::Max),
            5 => Some(Self::Min),
            _ => None,
        }
    }

    /// Aggregate a non-empty slice of known values.
    pub fn aggregate(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let value = match self {
            Self::Average => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Last => *values.last()?,
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        };
        Some(value)
    }
}

/// One archive definition of a retention spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Retention {
    /// Sampling precision in seconds.
    pub seconds_per_point: u32,
    /// Number of points kept at that precision.
    pub points: u32,
}

impl Retention {
    pub fn new(seconds_per_point: u32, points: u32) -> Self {
        Self {
            seconds_per_point,
            points,
        }
    }

    /// Time span covered by the archive, in seconds.
    pub fn retention(&self) -> u64 {
        u64::from(self.seconds_per_point) * u64::from(self.points)
    }
}

/// A stored data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Start of the interval the point belongs to (unix seconds).
    pub interval: u32,
    pub value: f64,
}
