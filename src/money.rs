//! Fixed-point money conversion.
//!
//! All monetary amounts in this crate are `u64` values scaled by
//! `10^AMOUNT_SCALE`. Floating point never touches money. Conversion to and
//! from the client/database representation goes through this module.
//!
//! ## Internal Representation
//! - Amounts are stored as `u64` scaled units (e.g. `1.5` at scale 8 is
//!   `150_000_000`)
//! - The database column type is `NUMERIC`; `rust_decimal::Decimal` bridges
//!   the boundary without rounding drift

use rust_decimal::prelude::*;
use thiserror::Error;

/// Fractional digits carried by every amount in the system.
///
/// The ledger requires at least 4; we use 8 so sub-cent splits never lose
/// precision across postings.
pub const AMOUNT_SCALE: u32 = 8;

/// Money conversion errors
#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("amount too large, would overflow")]
    Overflow,

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Convert a client-provided amount string to scaled `u64` units.
///
/// Strict by design: no sign, no bare dot, no silent truncation, no zero.
///
/// # Example
/// ```ignore
/// let internal = parse_amount("1.5")?;
/// assert_eq!(internal, 150_000_000);
/// ```
pub fn parse_amount(amount_str: &str) -> Result<u64, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            // Reject ambiguous forms like ".5" and "5."
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g. use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g. use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if frac.len() > AMOUNT_SCALE as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: AMOUNT_SCALE,
        });
    }

    let whole_num: u64 = whole.parse::<u64>().map_err(|e| {
        let err_str = e.to_string();
        if err_str.contains("too large") || err_str.contains("overflow") {
            MoneyError::Overflow
        } else {
            MoneyError::InvalidFormat(format!("invalid character in whole part: {}", whole))
        }
    })?;

    let frac_num: u64 = if frac.is_empty() {
        0
    } else {
        let frac_padded = format!("{:0<width$}", frac, width = AMOUNT_SCALE as usize);
        frac_padded[..AMOUNT_SCALE as usize]
            .parse::<u64>()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let multiplier = 10u64.pow(AMOUNT_SCALE);
    let amount = whole_num
        .checked_mul(multiplier)
        .and_then(|v: u64| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    if amount == 0 {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(amount)
}

/// Convert scaled units to the `Decimal` bound into `NUMERIC` columns.
pub fn amount_to_decimal(value: u64) -> Decimal {
    Decimal::from_i128_with_scale(value as i128, AMOUNT_SCALE)
}

/// Convert a `NUMERIC` value read from the database back to scaled units.
///
/// # Errors
/// * `InvalidAmount` - negative value
/// * `PrecisionOverflow` - more fractional digits than `AMOUNT_SCALE`
/// * `Overflow` - does not fit in `u64`
pub fn decimal_to_amount(decimal: Decimal) -> Result<u64, MoneyError> {
    if decimal.is_sign_negative() {
        return Err(MoneyError::InvalidAmount);
    }

    // NUMERIC reads can carry trailing zeros past our scale
    let normalized = decimal.normalize();
    if normalized.scale() > AMOUNT_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: AMOUNT_SCALE,
        });
    }

    let multiplier = Decimal::from(10u64.pow(AMOUNT_SCALE));
    let result = normalized * multiplier;

    if !result.fract().is_zero() {
        return Err(MoneyError::PrecisionOverflow {
            provided: decimal.scale(),
            max: AMOUNT_SCALE,
        });
    }

    result.to_u64().ok_or(MoneyError::Overflow)
}

/// Convert scaled units to a display string.
pub fn format_amount(value: u64, display_decimals: u32) -> String {
    let decimal_value = Decimal::from(value) / Decimal::from(10u64.pow(AMOUNT_SCALE));
    format!("{:.prec$}", decimal_value, prec = display_decimals as usize)
}

/// Full-precision string (for logs and internal exchange).
pub fn format_amount_full(value: u64) -> String {
    format_amount(value, AMOUNT_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parse_amount_variations() {
        assert_eq!(parse_amount("1.23").unwrap(), 123_000_000);
        assert_eq!(parse_amount("001.23").unwrap(), 123_000_000);
        assert_eq!(parse_amount("0.00000001").unwrap(), 1);
        assert_eq!(parse_amount("500").unwrap(), 50_000_000_000);

        // Zero amounts rejected
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("0.00").is_err());
    }

    #[test]
    fn parse_amount_invalid_formats() {
        for case in [
            "1,000.00", "1.2.3", "1. 23", "+1.23", "-1.23", "1e2", "0x12", ".", "1..", ".5", "5.",
        ] {
            assert!(parse_amount(case).is_err(), "should reject: {}", case);
        }
    }

    #[test]
    fn parse_amount_precision_limits() {
        assert!(parse_amount("1.23456789").is_ok());
        let res = parse_amount("1.234567891");
        assert!(matches!(
            res,
            Err(MoneyError::PrecisionOverflow {
                provided: 9,
                max: 8
            })
        ));
    }

    #[test]
    fn parse_amount_u64_boundary() {
        // Max u64 at scale 8: 184,467,440,737.09551615
        assert_eq!(parse_amount("184467440737.09551615").unwrap(), u64::MAX);
        assert!(matches!(
            parse_amount("184467440737.09551616"),
            Err(MoneyError::Overflow)
        ));
    }

    #[test]
    fn decimal_roundtrip() {
        let cases = [1u64, 123, 150_000_000, 50_000_000_000, u64::MAX];
        for v in cases {
            let d = amount_to_decimal(v);
            assert_eq!(
                decimal_to_amount(d).unwrap(),
                v,
                "roundtrip failed for {}",
                v
            );
        }
    }

    #[test]
    fn decimal_to_amount_rejects_negative_and_excess_scale() {
        assert!(decimal_to_amount(Decimal::from_str("-1.0").unwrap()).is_err());
        assert!(decimal_to_amount(Decimal::from_str("0.000000001").unwrap()).is_err());
        // Trailing zeros beyond scale 8 are fine after normalization
        assert_eq!(
            decimal_to_amount(Decimal::from_str("1.2300000000").unwrap()).unwrap(),
            123_000_000
        );
    }

    #[test]
    fn format_amount_display() {
        assert_eq!(format_amount(150_000_000, 2), "1.50");
        assert_eq!(format_amount_full(150_000_000), "1.50000000");
        assert_eq!(format_amount(50_000_000_000, 4), "500.0000");
    }
}
