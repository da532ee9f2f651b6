//! Kubernetes resource quantity parsing
//!
//! Converts quantity strings such as `250m`, `2`, `1Gi` or `1e3` into the
//! integral sub-units used throughout the crate (millicores, bytes).
//! Fractional results are rounded up, matching the API server's
//! `MilliValue()`/`Value()` semantics.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),
    #[error("unknown suffix {suffix:?} in quantity {quantity:?}")]
    UnknownSuffix { quantity: String, suffix: String },
}

/// Parse a quantity into base units (cores, bytes)
pub fn parse_quantity(quantity: &str) -> Result<f64, QuantityError> {
    let trimmed = quantity.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| QuantityError::InvalidNumber(trimmed.to_string()))?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        s if s.starts_with('e') || s.starts_with('E') => {
            let exponent: i32 = s[1..].parse().map_err(|_| QuantityError::UnknownSuffix {
                quantity: trimmed.to_string(),
                suffix: s.to_string(),
            })?;
            10f64.powi(exponent)
        }
        s => {
            return Err(QuantityError::UnknownSuffix {
                quantity: trimmed.to_string(),
                suffix: s.to_string(),
            })
        }
    };

    Ok(value * multiplier)
}

/// Parse a CPU quantity into millicores
pub fn parse_cpu_millis(quantity: &str) -> Result<i64, QuantityError> {
    parse_quantity(quantity).map(|cores| (cores * 1000.0).ceil() as i64)
}

/// Parse a memory quantity into bytes
pub fn parse_memory_bytes(quantity: &str) -> Result<i64, QuantityError> {
    parse_quantity(quantity).map(|bytes| bytes.ceil() as i64)
}
