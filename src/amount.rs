//! Base-unit token amounts
//!
//! Amounts are always held as U256 base units. Decimal text is converted with
//! integer arithmetic only; the `decimals` count is carried for display.

use crate::{Error, Result};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A token amount in base units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub raw: U256,
    pub decimals: u8,
}

impl Amount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    /// Parse a human decimal string ("0.1", "25", "1.000001") into base units.
    ///
    /// Rejects signs, exponents, empty parts and more fractional digits than
    /// `decimals` can represent.
    pub fn parse(text: &str, decimals: u8) -> Result<Self> {
        let text = text.trim();
        let invalid = || Error::Validation(format!("Invalid amount '{}'", text));

        let (whole, fraction) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || !all_digits(fraction) {
            return Err(invalid());
        }
        if fraction.len() > decimals as usize {
            return Err(Error::Validation(format!(
                "Amount '{}' has more than {} decimal places",
                text, decimals
            )));
        }

        let scale = U256::from(10u8).pow(U256::from(decimals));
        let whole_units = if whole.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(whole, 10).map_err(|_| invalid())?
        };

        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        let fraction_units = if padded.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(&padded, 10).map_err(|_| invalid())?
        };

        let raw = whole_units
            .checked_mul(scale)
            .and_then(|v| v.checked_add(fraction_units))
            .ok_or_else(|| Error::Validation(format!("Amount '{}' is too large", text)))?;

        Ok(Self { raw, decimals })
    }

    /// Parse and require a strictly positive amount
    pub fn parse_positive(text: &str, decimals: u8) -> Result<Self> {
        let amount = Self::parse(text, decimals)?;
        if amount.is_zero() {
            return Err(Error::Validation("Amount must be greater than 0".to_string()));
        }
        Ok(amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.raw, self.decimals as u32))
    }
}

/// Format a U256 value with decimals
pub fn format_units(value: U256, decimals: u32) -> String {
    if value.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10).pow(U256::from(decimals));
    let whole = value / divisor;
    let remainder = value % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let remainder_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = remainder_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_one_ether_is_exact() {
        let expected = U256::from(100_000_000_000_000_000u128);
        for _ in 0..1_000 {
            let amount = Amount::parse("0.1", 18).unwrap();
            assert_eq!(amount.raw, expected);
        }
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(Amount::parse("25", 6).unwrap().raw, U256::from(25_000_000u64));
        assert_eq!(Amount::parse("1.000001", 6).unwrap().raw, U256::from(1_000_001u64));
        assert_eq!(Amount::parse(".5", 2).unwrap().raw, U256::from(50u64));
        assert_eq!(Amount::parse("3.", 2).unwrap().raw, U256::from(300u64));
        assert_eq!(Amount::parse("7", 0).unwrap().raw, U256::from(7u64));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", ".", "-1", "1e18", "0x10", "1.2.3", "abc", " 1 2"] {
            assert!(
                matches!(Amount::parse(bad, 18), Err(Error::Validation(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_rejects_excess_precision() {
        let err = Amount::parse("1.0000001", 6).unwrap_err();
        assert!(err.to_string().contains("6 decimal places"));
    }

    #[test]
    fn test_parse_positive_rejects_zero() {
        assert!(Amount::parse_positive("0.000", 18).is_err());
        assert!(Amount::parse_positive("0.001", 18).is_ok());
    }

    #[test]
    fn test_format_units() {
        let one_eth = U256::from(1_000_000_000_000_000_000u128);
        assert_eq!(format_units(one_eth, 18), "1");

        let one_point_five = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(format_units(one_point_five, 18), "1.5");

        let thousand_usdc = U256::from(1_000_000_000u64);
        assert_eq!(format_units(thousand_usdc, 6), "1000");

        assert_eq!(format_units(U256::ZERO, 18), "0");
    }

    #[test]
    fn test_display_matches_parse() {
        let amount = Amount::parse("12.0345", 18).unwrap();
        assert_eq!(amount.to_string(), "12.0345");
    }
}
