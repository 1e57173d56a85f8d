//! Fixed-point money type
//!
//! Balances are an integer count of minor currency units (cents/tokens).
//! No binary floating point ever touches an amount; the decimal string
//! conversions below are the only place a fractional representation appears,
//! and both directions round with banker's rounding so values representable
//! in the minor unit survive a round trip unchanged.

use crate::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of decimal digits in the minor unit (cents).
const MINOR_UNIT_DIGITS: u32 = 2;

/// Signed amount in minor currency units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(0);

    /// Create from a count of minor units.
    pub fn from_minor(units: i64) -> Self {
        Self(units)
    }

    /// Raw minor-unit count.
    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Checked addition.
    pub fn add(self, other: Money) -> Result<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(Error::ArithmeticOverflow)
    }

    /// Checked subtraction.
    pub fn subtract(self, other: Money) -> Result<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(Error::ArithmeticOverflow)
    }

    /// Checked negation.
    pub fn negated(self) -> Result<Money> {
        self.0.checked_neg().map(Money).ok_or(Error::ArithmeticOverflow)
    }

    /// True if the amount is strictly below zero.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// True if the amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal display string ("12.50") into minor units.
    ///
    /// Sub-minor-unit digits are rounded with banker's rounding
    /// (`MidpointNearestEven`), matching [`Money::to_decimal_string`] so the
    /// conversion is stable in both directions.
    pub fn from_decimal_str(s: &str) -> Result<Money> {
        let decimal = Decimal::from_str(s.trim())
            .map_err(|e| Error::InvalidAmount(format!("unparsable amount {s:?}: {e}")))?;

        let scale = Decimal::from(10i64.pow(MINOR_UNIT_DIGITS));
        let scaled = decimal
            .checked_mul(scale)
            .ok_or(Error::ArithmeticOverflow)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);

        scaled.to_i64().map(Money).ok_or(Error::ArithmeticOverflow)
    }

    /// Render as a decimal display string with the full minor-unit scale.
    pub fn to_decimal_string(&self) -> String {
        Decimal::new(self.0, MINOR_UNIT_DIGITS).to_string()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_and_subtract() {
        let a = Money::from_minor(1000);
        let b = Money::from_minor(250);

        assert_eq!(a.add(b).unwrap(), Money::from_minor(1250));
        assert_eq!(a.subtract(b).unwrap(), Money::from_minor(750));
        assert_eq!(b.subtract(a).unwrap(), Money::from_minor(-750));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let max = Money::from_minor(i64::MAX);
        assert!(matches!(
            max.add(Money::from_minor(1)),
            Err(Error::ArithmeticOverflow)
        ));

        let min = Money::from_minor(i64::MIN);
        assert!(matches!(
            min.subtract(Money::from_minor(1)),
            Err(Error::ArithmeticOverflow)
        ));
        assert!(matches!(min.negated(), Err(Error::ArithmeticOverflow)));
    }

    #[test]
    fn test_is_negative() {
        assert!(Money::from_minor(-1).is_negative());
        assert!(!Money::ZERO.is_negative());
        assert!(!Money::from_minor(1).is_negative());
    }

    #[test]
    fn test_from_decimal_str() {
        assert_eq!(Money::from_decimal_str("12.50").unwrap(), Money::from_minor(1250));
        assert_eq!(Money::from_decimal_str("10").unwrap(), Money::from_minor(1000));
        assert_eq!(Money::from_decimal_str("-0.50").unwrap(), Money::from_minor(-50));
        assert!(Money::from_decimal_str("not money").is_err());
    }

    #[test]
    fn test_bankers_rounding() {
        // Midpoints round to the even neighbour in both directions
        assert_eq!(Money::from_decimal_str("1.005").unwrap(), Money::from_minor(100));
        assert_eq!(Money::from_decimal_str("1.015").unwrap(), Money::from_minor(102));
        assert_eq!(Money::from_decimal_str("2.675").unwrap(), Money::from_minor(268));
        assert_eq!(Money::from_decimal_str("-1.005").unwrap(), Money::from_minor(-100));
    }

    #[test]
    fn test_decimal_round_trip() {
        for units in [0i64, 1, 99, 100, 12345, -50, -12345] {
            let money = Money::from_minor(units);
            let rendered = money.to_decimal_string();
            assert_eq!(Money::from_decimal_str(&rendered).unwrap(), money);
        }
    }

    #[test]
    fn test_display_uses_minor_unit_scale() {
        assert_eq!(Money::from_minor(100).to_string(), "1.00");
        assert_eq!(Money::from_minor(-50).to_string(), "-0.50");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }
}
