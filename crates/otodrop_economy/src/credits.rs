//! # Fixed-Point Credits
//!
//! **CRITICAL: NO FLOATING POINT IN BALANCES OR PRICES**
//!
//! Every amount of money in the economy is a [`Credits`] value: an unsigned
//! count of hundredths ("cents") with two-decimal currency semantics.
//! Signed corrections made by admins are [`CreditDelta`] values.
//!
//! ## Why Fixed-Point?
//!
//! - Deterministic: `4.99 + 0.01 == 5.00`, always
//! - Non-negative by construction: a balance cannot be represented below zero
//! - Auditable: journal replays reproduce balances to the cent

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EconomyError, EconomyResult};

/// Number of decimal places for credits.
const DECIMAL_PLACES: u32 = 2;

/// The multiplier for 2 decimal places.
const MULTIPLIER: u64 = 10u64.pow(DECIMAL_PLACES);

/// Parses an unsigned decimal literal into an integer scaled by `10^decimals`.
///
/// Accepts `"12"`, `"12.3"`, `"12.34"`; rejects signs, exponents, empty
/// parts and more fractional digits than `decimals`.
pub(crate) fn parse_fixed(text: &str, decimals: u32) -> Option<u64> {
    let text = text.trim();
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };

    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac.len() > decimals as usize || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if text.ends_with('.') {
        return None;
    }

    let scale = 10u64.checked_pow(decimals)?;
    let whole: u64 = whole.parse().ok()?;

    let mut frac_value = 0u64;
    for (i, digit) in frac.bytes().enumerate() {
        let place = 10u64.pow(decimals - 1 - i as u32);
        frac_value += u64::from(digit - b'0') * place;
    }

    whole.checked_mul(scale)?.checked_add(frac_value)
}

// =============================================================================
// Credits
// =============================================================================

/// An unsigned amount of money with two decimal places.
///
/// Internally stores `value * 100` as a `u64`.
///
/// # Example
///
/// ```rust
/// use otodrop_economy::Credits;
///
/// let price: Credits = "4.99".parse().unwrap();
/// let balance = Credits::from_cents(2000);
/// assert_eq!(balance.checked_sub(price).unwrap().to_string(), "15.01");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Credits(u64);

impl Credits {
    /// Zero credits.
    pub const ZERO: Self = Self(0);

    /// One whole credit (1.00).
    pub const ONE: Self = Self(MULTIPLIER);

    /// Creates credits from a count of hundredths.
    #[inline]
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates credits from a whole number of units.
    #[inline]
    #[must_use]
    pub const fn from_whole(whole: u64) -> Self {
        Self(whole * MULTIPLIER)
    }

    /// Returns the count of hundredths.
    #[inline]
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Returns the whole-unit part.
    #[inline]
    #[must_use]
    pub const fn whole(self) -> u64 {
        self.0 / MULTIPLIER
    }

    /// Returns the hundredths part (0-99).
    #[inline]
    #[must_use]
    pub const fn fraction(self) -> u64 {
        self.0 % MULTIPLIER
    }

    /// Returns true if this amount is zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition. Returns `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction. Returns `None` if the result would be negative.
    #[inline]
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Safe addition with error on overflow.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::ArithmeticOverflow` if the sum does not fit.
    #[inline]
    pub fn safe_add(self, rhs: Self) -> EconomyResult<Self> {
        self.checked_add(rhs).ok_or(EconomyError::ArithmeticOverflow)
    }

    /// Applies a signed correction, clamping at zero.
    ///
    /// Positive deltas saturate at the maximum representable amount.
    #[must_use]
    pub const fn apply_clamped(self, delta: CreditDelta) -> Self {
        if delta.0 >= 0 {
            Self(self.0.saturating_add(delta.0.unsigned_abs()))
        } else {
            Self(self.0.saturating_sub(delta.0.unsigned_abs()))
        }
    }

    /// Sums an iterator of amounts, failing on overflow.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::ArithmeticOverflow` if the total does not fit.
    pub fn try_sum(amounts: impl IntoIterator<Item = Self>) -> EconomyResult<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.safe_add(amount))
    }
}

impl FromStr for Credits {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s, DECIMAL_PLACES)
            .map(Self)
            .ok_or_else(|| EconomyError::InvalidConfig(format!("not a credit amount: {s:?}")))
    }
}

impl fmt::Debug for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credits({}.{:02})", self.whole(), self.fraction())
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.whole(), self.fraction())
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// CreditDelta - signed admin corrections
// =============================================================================

/// A signed change to a balance, in hundredths.
///
/// Only admin adjustments use signed amounts; ordinary spending goes through
/// [`Credits`] and is rejected rather than clamped.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CreditDelta(i64);

impl CreditDelta {
    /// Creates a delta from signed hundredths.
    #[inline]
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the signed count of hundredths.
    #[inline]
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Returns true for deltas below zero.
    #[inline]
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl FromStr for CreditDelta {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let magnitude = parse_fixed(digits, DECIMAL_PLACES)
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| EconomyError::InvalidConfig(format!("not a credit delta: {s:?}")))?;
        Ok(Self(if negative { -magnitude } else { magnitude }))
    }
}

impl fmt::Debug for CreditDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CreditDelta({self})")
    }
}

impl fmt::Display for CreditDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:02}",
            magnitude / MULTIPLIER,
            magnitude % MULTIPLIER
        )
    }
}

impl Serialize for CreditDelta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CreditDelta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
