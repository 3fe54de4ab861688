//! Exact decimal quantities.
//!
//! Device values accumulate many small simulation deltas, so they are stored as
//! arbitrary precision decimals rather than binary floats. On the wire a
//! quantity is a decimal string (`"10.25"`); numbers are accepted on input.
//!
//! Parsed quantities are confined to a fixed window: magnitudes below `10^15`
//! and at most nine fractional digits. Anything wider is rejected before it
//! can be expanded for display or integer checks.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Integer digits accepted on input; the largest magnitude is just under `10^15`.
pub const MAX_INTEGER_DIGITS: i64 = 15;

/// Fractional digits accepted on input, after trailing zeros are dropped.
pub const MAX_FRACTION_DIGITS: i64 = 9;

/// Longest textual quantity worth handing to the decimal parser.
const MAX_INPUT_LEN: usize = 64;

/// A fixed-point decimal quantity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Quantity(BigDecimal);

impl Quantity {
    pub fn zero() -> Self {
        Self(BigDecimal::zero())
    }

    pub fn from_i64(value: i64) -> Self {
        Self(BigDecimal::from(value))
    }

    /// Build a quantity from thousandths, e.g. `from_milli(10_250)` is `10.25`.
    pub fn from_milli(milli: i64) -> Self {
        Self(BigDecimal::from(milli) / BigDecimal::from(1000))
    }

    /// Round a float to the nearest thousandth.
    ///
    /// Returns `None` for NaN, infinities and magnitudes of `10^15` or more.
    pub fn from_f64_milli(value: f64) -> Option<Self> {
        if !value.is_finite() || value.abs() >= 1e15 {
            return None;
        }
        Some(Self::from_milli((value * 1000.0).round() as i64))
    }

    pub fn from_bool(value: bool) -> Self {
        Self::from_i64(i64::from(value))
    }

    pub fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.0.to_f64()
    }

    /// Integral value, or `None` when the quantity has a fractional part.
    pub fn to_i64(&self) -> Option<i64> {
        if self.0.is_integer() {
            self.0.to_i64()
        } else {
            None
        }
    }

    pub fn is_integer(&self) -> bool {
        self.0.is_integer()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Accept `value` only if it fits the parse window.
    ///
    /// Works on the digit string of the unscaled integer, so a huge exponent
    /// costs nothing to reject.
    pub fn checked(value: BigDecimal) -> Result<Self, CoreError> {
        if value.is_zero() {
            return Ok(Self::zero());
        }
        let (int, scale) = value.as_bigint_and_scale();
        let digits = int.to_string();
        let digits = digits.trim_start_matches('-');
        let significant = digits.trim_end_matches('0');
        let fraction = i128::from(scale) - (digits.len() - significant.len()) as i128;
        let integer = significant.len() as i128 - fraction;

        if fraction > i128::from(MAX_FRACTION_DIGITS) {
            return Err(CoreError::invalid_quantity(format!(
                "more than {MAX_FRACTION_DIGITS} fractional digits"
            )));
        }
        if integer > i128::from(MAX_INTEGER_DIGITS) {
            return Err(CoreError::invalid_quantity(format!(
                "magnitude must be below 1e{MAX_INTEGER_DIGITS}"
            )));
        }
        Ok(Self(value))
    }
}

impl From<BigDecimal> for Quantity {
    fn from(value: BigDecimal) -> Self {
        Self(value)
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Quantity> for &'a Quantity {
    type Output = Quantity;

    fn add(self, rhs: &'a Quantity) -> Self::Output {
        Quantity(&self.0 + &rhs.0)
    }
}

impl FromStr for Quantity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_quantity("empty string"));
        }
        if trimmed.len() > MAX_INPUT_LEN {
            return Err(CoreError::invalid_quantity(format!(
                "longer than {MAX_INPUT_LEN} characters"
            )));
        }
        let value = BigDecimal::from_str(trimmed)
            .map_err(|e| CoreError::invalid_quantity(format!("'{trimmed}': {e}")))?;
        Self::checked(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_integer() {
            write!(f, "{}", self.0.with_scale(0))
        } else {
            // An explicit precision keeps small fractions out of exponent form.
            let value = self.0.normalized();
            let scale = usize::try_from(value.fractional_digit_count()).unwrap_or(0);
            write!(f, "{value:.scale$}")
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Quantity::from_str(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Quantity::checked(BigDecimal::from(v)).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Quantity::checked(BigDecimal::from(v)).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if !v.is_finite() {
            return Err(E::custom("quantity must be finite"));
        }
        if v.abs() >= 1e15 {
            return Err(E::custom(CoreError::invalid_quantity(format!(
                "magnitude must be below 1e{MAX_INTEGER_DIGITS}"
            ))));
        }
        Quantity::from_str(&v.to_string()).map_err(E::custom)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(Quantity::from_bool(v))
    }
}
