//! A USD amount newtype which maintains some useful internal invariants.
//!
//! All billing state is kept in integer cents; [`UsdCents`] enforces
//! non-negativity and provides checked arithmetic so that balance math can
//! never silently wrap. Conversions to dollar [`Decimal`]s exist only for
//! display purposes.
//!
//! Note that we don't impl `From<i64>` because we want calling code to be
//! explicit that the input unit is cents.
//!
//! [`Decimal`]: rust_decimal::Decimal

use std::{
    fmt::{self, Display},
    iter::Sum,
};

use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize};

/// Errors that can occur when attempting to construct a [`UsdCents`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Amount is negative")]
    Negative,
    #[error("Amount is too large")]
    TooLarge,
}

/// A non-negative USD amount in integer cents.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
)]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub struct UsdCents(
    #[cfg_attr(
        any(test, feature = "test-utils"),
        proptest(strategy = "0i64..=1_000_000_00")
    )]
    i64,
);

impl UsdCents {
    /// An amount of zero dollars and zero cents.
    pub const ZERO: Self = Self(0);

    /// Construct a [`UsdCents`] from a cents [`i64`] value.
    #[inline]
    pub fn try_from_cents(cents: i64) -> Result<Self, Error> {
        if cents >= 0 {
            Ok(Self(cents))
        } else {
            Err(Error::Negative)
        }
    }

    /// Construct a [`UsdCents`] from a cents [`u32`] value, e.g. a tier price.
    #[inline]
    pub const fn from_cents_u32(cents: u32) -> Self {
        Self(cents as i64)
    }

    /// Returns the amount as an [`i64`] cents value.
    #[inline]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Returns the amount as a dollar-denominated [`Decimal`], for display.
    #[inline]
    pub fn dollars(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition. Errors if the sum overflows.
    pub fn checked_add(self, rhs: Self) -> Result<Self, Error> {
        self.0.checked_add(rhs.0).map(Self).ok_or(Error::TooLarge)
    }

    /// Checked subtraction. Errors if the result would be negative.
    pub fn checked_sub(self, rhs: Self) -> Result<Self, Error> {
        Self::try_from_cents(self.0 - rhs.0)
    }

    /// Subtraction clamped at zero. `$3 - $5 = $0`.
    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self((self.0 - rhs.0).max(0))
    }

    /// Multiply by a unitless quantity. Errors on overflow.
    pub fn checked_mul(self, quantity: u32) -> Result<Self, Error> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Self)
            .ok_or(Error::TooLarge)
    }

    #[inline]
    pub fn min(self, rhs: Self) -> Self {
        Self(self.0.min(rhs.0))
    }
}

impl Sum for UsdCents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        // Billing sums stay far below i64::MAX cents; wrap would be a bug.
        Self(iter.map(|x| x.0).sum())
    }
}

/// Displays as dollars: `2900` cents => `"$29.00"`.
impl Display for UsdCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Enforces that the inner [`i64`] is non-negative.
impl<'de> Deserialize<'de> for UsdCents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        Self::try_from_cents(value).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Signed(value),
                &"cents amount must be non-negative",
            )
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_dollars() {
        assert_eq!(UsdCents::from_cents_u32(2900).to_string(), "$29.00");
        assert_eq!(UsdCents::from_cents_u32(905).to_string(), "$9.05");
        assert_eq!(UsdCents::ZERO.to_string(), "$0.00");
    }

    #[test]
    fn checked_sub_never_negative() {
        let three = UsdCents::from_cents_u32(300);
        let five = UsdCents::from_cents_u32(500);
        assert!(five.checked_sub(three).is_ok());
        assert!(three.checked_sub(five).is_err());
        assert_eq!(three.saturating_sub(five), UsdCents::ZERO);
    }

    #[test]
    fn deserialize_enforces_nonnegative() {
        assert_eq!(
            serde_json::from_str::<UsdCents>("42").unwrap().cents(),
            42
        );
        assert!(serde_json::from_str::<UsdCents>("-42").is_err());
    }
}
