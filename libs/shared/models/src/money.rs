use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MINOR_PER_MAJOR: i64 = 100;

/// Fixed-point monetary amount stored as integer minor units (1/100 of the
/// major unit). Currency-agnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyParseError {
    #[error("amount is empty")]
    Empty,

    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("amount has more than two decimal places: {0}")]
    TooPrecise(String),

    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn from_major(major: i64) -> Self {
        Self(major.saturating_mul(MINOR_PER_MAJOR))
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_PER_MAJOR as u64;
        write!(f, "{}{}.{:02}", sign, abs / per, abs % per)
    }
}

impl FromStr for Money {
    type Err = MoneyParseError;

    /// Parses "1000", "1000.5" or "-12.34" into minor units.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(MoneyParseError::Empty);
        }

        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let (major_str, minor_str) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, ""),
        };

        if major_str.is_empty() || !major_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyParseError::Invalid(raw.to_string()));
        }
        if !minor_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyParseError::Invalid(raw.to_string()));
        }
        if minor_str.len() > 2 {
            return Err(MoneyParseError::TooPrecise(raw.to_string()));
        }

        let major: i64 = major_str
            .parse()
            .map_err(|_| MoneyParseError::OutOfRange(raw.to_string()))?;
        let minor: i64 = match minor_str.len() {
            0 => 0,
            1 => minor_str.parse::<i64>().unwrap_or(0) * 10,
            _ => minor_str.parse::<i64>().unwrap_or(0),
        };

        let total = major
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|m| m.checked_add(minor))
            .ok_or_else(|| MoneyParseError::OutOfRange(raw.to_string()))?;

        Ok(Money(if negative { -total } else { total }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_and_fractional_amounts() {
        assert_eq!("1000".parse::<Money>().unwrap(), Money::from_major(1000));
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::from_minor(1250));
        assert_eq!("12.05".parse::<Money>().unwrap(), Money::from_minor(1205));
        assert_eq!("-3.10".parse::<Money>().unwrap(), Money::from_minor(-310));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<Money>(), Err(MoneyParseError::Empty));
        assert!(matches!("abc".parse::<Money>(), Err(MoneyParseError::Invalid(_))));
        assert!(matches!("1.234".parse::<Money>(), Err(MoneyParseError::TooPrecise(_))));
        assert!(matches!(".5".parse::<Money>(), Err(MoneyParseError::Invalid(_))));
    }

    #[test]
    fn test_display_uses_two_decimals() {
        assert_eq!(Money::from_major(800).to_string(), "800.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1250).to_string(), "-12.50");
    }

    #[test]
    fn test_checked_arithmetic() {
        let balance = Money::from_major(1000);
        let price = Money::from_major(800);
        assert_eq!(balance.checked_sub(price), Some(Money::from_major(200)));
        assert_eq!(Money::from_minor(i64::MAX).checked_add(Money::from_minor(1)), None);
        assert!(price.checked_sub(balance).unwrap().is_negative());
    }

    #[test]
    fn test_serializes_as_minor_units() {
        let json = serde_json::to_string(&Money::from_major(15)).unwrap();
        assert_eq!(json, "1500");
    }
}
