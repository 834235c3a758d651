use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monetary value in integer minor units (cents for USD).
///
/// Wraps an `i64` so amounts cannot be mixed up with quantities or versions.
/// Deserialization goes through `Money::new`, so a negative amount never parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// Creates a non-negative amount. Prices and totals are never negative.
    pub fn new(minor_units: i64) -> Result<Self, LedgerError> {
        if minor_units >= 0 {
            Ok(Self(minor_units))
        } else {
            Err(LedgerError::Validation(
                "amount must not be negative".to_string(),
            ))
        }
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(quantity)).map(Self)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }
}

impl TryFrom<i64> for Money {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for i64 {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
