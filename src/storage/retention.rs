//! Retention spec parsing.
//!
//! A retention spec is a comma separated list of `precision:duration`
//! archive definitions, finest first:
//!
//! ```text
//! 10s:6h,1m:7d,10m:5y
//! 60:1440
//! ```
//!
//! A bare integer precision is a number of seconds; a bare integer duration
//! is a point count. Suffixed values use `s`, `m`, `h`, `d`, `w` or `y`
//! (any word starting with those letters, e.g. `min`, `hours`).

use crate::storage::BackendError;
use crate::storage::types::Retention;

/// Parse a full retention spec into archive definitions.
pub fn parse_retention_defs(spec: &str) -> Result<Vec<Retention>, BackendError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(invalid(spec, "retention spec is empty"));
    }

    spec.split(',').map(|def| parse_retention_def(def.trim())).collect()
}

/// Parse one `precision:duration` definition.
pub fn parse_retention_def(def: &str) -> Result<Retention, BackendError> {
    let Some((precision, duration)) = def.split_once(':') else {
        return Err(invalid(def, "expected 'precision:duration'"));
    };

    let seconds_per_point = match precision.trim().parse::<u32>() {
        Ok(seconds) => seconds,
        Err(_) => parse_unit_value(precision.trim()).map_err(|reason| invalid(def, &reason))?,
    };
    if seconds_per_point == 0 {
        return Err(invalid(def, "precision must be positive"));
    }

    let points = match duration.trim().parse::<u32>() {
        Ok(points) => points,
        Err(_) => {
            let seconds =
                parse_unit_value(duration.trim()).map_err(|reason| invalid(def, &reason))?;
            seconds / seconds_per_point
        }
    };
    if points == 0 {
        return Err(invalid(def, "archive must hold at least one point"));
    }

    Ok(Retention::new(seconds_per_point, points))
}

/// Parse `<number><unit>` into seconds.
fn parse_unit_value(input: &str) -> Result<u32, String> {
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in '{input}'"))?;
    let (number, unit) = input.split_at(split);

    let number: u32 = number
        .parse()
        .map_err(|_| format!("invalid number in '{input}'"))?;
    let multiplier: u32 = match unit.chars().next() {
        Some('s') => 1,
        Some('m') => 60,
        Some('h') => 3_600,
        Some('d') => 86_400,
        Some('w') => 604_800,
        Some('y') => 31_536_000,
        _ => return Err(format!("unknown unit '{unit}'")),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{input}' overflows"))
}

fn invalid(spec: &str, reason: &str) -> BackendError {
    BackendError::InvalidRetention {
        spec: spec.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_numbers() {
        let defs = parse_retention_defs("60:1440").unwrap();
        assert_eq!(defs, vec![Retention::new(60, 1440)]);
    }

    #[test]
    fn test_parse_units() {
        let defs = parse_retention_defs("10s:6h, 1m:7d,10min:5y").unwrap();
        assert_eq!(
            defs,
            vec![
                Retention::new(10, 2_160),
                Retention::new(60, 10_080),
                Retention::new(600, 262_800),
            ]
        );
    }

    #[test]
    fn test_parse_mixed() {
        let defs = parse_retention_defs("1h:720").unwrap();
        assert_eq!(defs, vec![Retention::new(3_600, 720)]);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_retention_defs("").is_err());
        assert!(parse_retention_defs("60").is_err());
        assert!(parse_retention_defs("60:abc").is_err());
        assert!(parse_retention_defs("0:10").is_err());
        assert!(parse_retention_defs("1x:10").is_err());
        assert!(parse_retention_defs("1h:1m").is_err());
        assert!(parse_retention_defs("60:1440,").is_err());
    }
}
