//! Plaintext line protocol.
//!
//! Each record is a single line of the form:
//!
//! ```text
//! <metric> <value> <timestamp>\n
//! ```
//!
//! Fields are separated by exactly one space. The timestamp may carry a
//! fractional part, which is truncated toward zero.

use thiserror::Error;

/// Field separator on the wire.
const SEPARATOR: char = ' ';

/// A decoded, validated sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Dotted metric identifier (e.g. `servers.host1.cpu`).
    pub metric: String,
    /// Sample value.
    pub value: f64,
    /// Unix timestamp in whole seconds, never zero.
    pub timestamp: i64,
}

/// Reasons a line is rejected by [`decode_line`].
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// Wrong number of fields, or an empty metric name.
    #[error("invalid line: {0:?}")]
    InvalidLine(String),

    /// The value field is not a float.
    #[error("invalid value '{value}': {reason}")]
    InvalidValue { value: String, reason: String },

    /// The timestamp field is not a float.
    #[error("invalid timestamp '{timestamp}': {reason}")]
    InvalidTimestamp { timestamp: String, reason: String },

    /// The timestamp truncates to zero.
    #[error("invalid timestamp (0): {0:?}")]
    ZeroTimestamp(String),
}

/// Decode one raw line into a [`Sample`].
///
/// The line may or may not include its terminating `\n`.
pub fn decode_line(line: &str) -> Result<Sample, DecodeError> {
    let fields: Vec<&str> = line.split(SEPARATOR).collect();
    let [metric, value, timestamp] = fields.as_slice() else {
        return Err(DecodeError::InvalidLine(line.to_string()));
    };

    let value: f64 = value.parse().map_err(|e: std::num::ParseFloatError| {
        DecodeError::InvalidValue {
            value: (*value).to_string(),
            reason: e.to_string(),
        }
    })?;

    let timestamp = timestamp.trim_end_matches('\n');
    let seconds: f64 = timestamp.parse().map_err(|e: std::num::ParseFloatError| {
        DecodeError::InvalidTimestamp {
            timestamp: timestamp.to_string(),
            reason: e.to_string(),
        }
    })?;
    // `as` truncates toward zero and saturates; NaN becomes 0.
    let timestamp = seconds as i64;

    if metric.is_empty() {
        return Err(DecodeError::InvalidLine(line.to_string()));
    }

    if timestamp == 0 {
        return Err(DecodeError::ZeroTimestamp(line.to_string()));
    }

    Ok(Sample {
        metric: (*metric).to_string(),
        value,
        timestamp,
    })
}
