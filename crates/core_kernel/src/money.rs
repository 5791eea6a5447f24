//! Money types with precise decimal arithmetic
//!
//! The clinic ledger works in a single currency, so `Money` is a thin wrapper
//! around `rust_decimal::Decimal` that fixes the internal scale and provides
//! the clamping and rate helpers the billing engine relies on.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Neg, Sub};
use thiserror::Error;

/// Internal scale of every monetary amount
pub const MONEY_SCALE: u32 = 4;

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Division by zero")]
    DivisionByZero,
}

/// A monetary amount in the clinic's operating currency
///
/// Amounts are stored with 4 decimal places so that fractional inputs such as
/// `999.995` survive unchanged; display rounds to 2. Deserialized amounts
/// are rounded the same way as [`Money::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Creates a new Money value, rounding to the internal scale
    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp(MONEY_SCALE))
    }

    /// Creates Money from an integer amount in minor units (centavos)
    pub fn from_minor(minor_units: i64) -> Self {
        Self::new(Decimal::new(minor_units, 2))
    }

    /// Creates a zero amount
    pub fn zero() -> Self {
        Self(dec!(0))
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns true if the amount is negative
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Clamps negative amounts to zero
    pub fn clamp_non_negative(&self) -> Self {
        if self.is_negative() {
            Self::zero()
        } else {
            *self
        }
    }

    /// Subtracts `other`, never going below zero
    pub fn saturating_sub(&self, other: &Money) -> Self {
        (*self - *other).clamp_non_negative()
    }

    /// Multiplies by a scalar (e.g. quantity or rate)
    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::new(self.0 * factor)
    }

    /// Divides by a scalar
    pub fn divide(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        Ok(Self::new(self.0 / divisor))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.0 - other.0)
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;

    fn mul(self, factor: Decimal) -> Self {
        self.multiply(factor)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

/// A percentage rate such as a senior citizen / PWD discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate {
    /// The rate as a percentage (e.g. 20 for 20%)
    percentage: Decimal,
}

impl Rate {
    /// Creates a rate from a percentage (e.g. 20 for 20%)
    pub fn from_percentage(percentage: Decimal) -> Self {
        Self { percentage }
    }

    /// Returns the rate as a percentage
    pub fn as_percentage(&self) -> Decimal {
        self.percentage
    }

    /// Returns the rate as a fraction (0.20 for 20%)
    pub fn as_fraction(&self) -> Decimal {
        self.percentage / dec!(100)
    }

    /// Returns true for rates in `(0, 100]`
    pub fn is_valid_discount(&self) -> bool {
        self.percentage > Decimal::ZERO && self.percentage <= dec!(100)
    }

    /// Returns the portion of `money` this rate represents
    pub fn apply(&self, money: &Money) -> Money {
        money.multiply(self.as_fraction())
    }

    /// Returns `money` reduced by this rate
    pub fn discount(&self, money: &Money) -> Money {
        *money - self.apply(money)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percentage.round_dp(4))
    }
}
