//! # Fixed-Point Amounts
//!
//! Every monetary quantity in the ledger is an [`Amount`]: an unsigned count
//! of the smallest indivisible unit (10^-8 of a token). Ratios such as fee
//! rates, APY, revenue shares and stake multipliers are [`Rate`]s expressed
//! in parts-per-million.
//!
//! ## Rules
//!
//! - No floating point touches a balance.
//! - Multiplication by a rate truncates toward zero.
//! - Splits are done by subtraction so the parts always sum to the whole.
//! - Decimal strings exist only at the boundary (config files, CLI, display).
//!
//! ```text
//! "49.5"  ──parse──►  Amount(4_950_000_000)  ──display──►  "49.50000000"
//! ```

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decimal places carried by an [`Amount`].
pub const DECIMALS: u32 = 8;

/// Smallest units in one whole token.
pub const ONE_TOKEN: u128 = 100_000_000;

/// Parts-per-million denominator for [`Rate`].
pub const RATE_SCALE: u64 = 1_000_000;

/// Basis points in 100%.
pub const BPS_SCALE: u32 = 10_000;

/// Unsigned fixed-point token quantity with 8 decimals.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Amount(u128);

impl Amount {
    /// Zero tokens.
    pub const ZERO: Self = Self(0);

    /// Exactly one token.
    pub const ONE: Self = Self(ONE_TOKEN);

    /// Largest representable amount.
    pub const MAX: Self = Self(u128::MAX);

    /// Creates from a raw unit count.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Returns the raw unit count.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u128 {
        self.0
    }

    /// Creates from a whole number of tokens.
    #[inline]
    #[must_use]
    pub const fn from_tokens(tokens: u64) -> Self {
        Self(tokens as u128 * ONE_TOKEN)
    }

    /// Whole-token part.
    #[inline]
    #[must_use]
    pub const fn whole(self) -> u128 {
        self.0 / ONE_TOKEN
    }

    /// Fractional part in raw units (0 to 10^8 - 1).
    #[inline]
    #[must_use]
    pub const fn fraction(self) -> u128 {
        self.0 % ONE_TOKEN
    }

    /// Returns true if zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction. `None` means the result would be negative.
    #[inline]
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiplies by a rate, truncating. Exact (no intermediate overflow)
    /// unless the result itself does not fit.
    #[must_use]
    pub fn checked_mul_rate(self, rate: Rate) -> Option<Self> {
        self.checked_mul_div(u128::from(rate.0), u128::from(RATE_SCALE))
    }

    /// Computes `floor(self * num / den)`.
    ///
    /// Falls back to quotient/remainder decomposition when the direct
    /// product overflows.
    #[must_use]
    pub fn checked_mul_div(self, num: u128, den: u128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        if let Some(product) = self.0.checked_mul(num) {
            return Some(Self(product / den));
        }
        let quotient = self.0 / den;
        let remainder = self.0 % den;
        let high = quotient.checked_mul(num)?;
        let low = remainder.checked_mul(num)? / den;
        high.checked_add(low).map(Self)
    }

    /// Sums an iterator, `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(iter: I) -> Option<Self> {
        iter.into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.whole(), self.fraction())
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({self})")
    }
}

/// Failure to parse a decimal amount string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    /// Input was empty.
    #[error("empty amount")]
    Empty,

    /// Input contained something other than digits and one decimal point.
    #[error("invalid amount: {0:?}")]
    Invalid(String),

    /// More than eight fractional digits.
    #[error("too many decimal places (max 8): {0:?}")]
    TooPrecise(String),

    /// Value does not fit.
    #[error("amount out of range: {0:?}")]
    Overflow(String),
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseAmountError::Empty);
        }

        let (whole, fraction) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(ParseAmountError::Invalid(s.to_string()));
        }
        let digits_only = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !digits_only(whole) || !digits_only(fraction) {
            return Err(ParseAmountError::Invalid(s.to_string()));
        }
        if fraction.len() > DECIMALS as usize {
            return Err(ParseAmountError::TooPrecise(s.to_string()));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| ParseAmountError::Overflow(s.to_string()))?
        };
        let mut fraction_units: u128 = 0;
        for (i, b) in fraction.bytes().enumerate() {
            let digit = u128::from(b - b'0');
            fraction_units += digit * 10u128.pow(DECIMALS - 1 - i as u32);
        }

        whole
            .checked_mul(ONE_TOKEN)
            .and_then(|units| units.checked_add(fraction_units))
            .map(Self)
            .ok_or_else(|| ParseAmountError::Overflow(s.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(AmountVisitor)
    }
}

/// Accepts decimal strings everywhere and bare integers (whole tokens) from
/// self-describing formats such as TOML.
struct AmountVisitor;

impl<'de> de::Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal token amount such as \"12.5\" or a whole-token integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::from_tokens(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        u64::try_from(v)
            .map(Amount::from_tokens)
            .map_err(|_| E::custom("amount cannot be negative"))
    }
}

/// Dimensionless ratio in parts-per-million (`1_000_000` = 1.0).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u64);

impl Rate {
    /// 0.0
    pub const ZERO: Self = Self(0);

    /// 1.0
    pub const ONE: Self = Self(RATE_SCALE);

    /// From parts-per-million.
    #[inline]
    #[must_use]
    pub const fn from_ppm(ppm: u64) -> Self {
        Self(ppm)
    }

    /// From basis points (`100` = 1%).
    #[inline]
    #[must_use]
    pub const fn from_bps(bps: u32) -> Self {
        Self(bps as u64 * 100)
    }

    /// Parts-per-million.
    #[inline]
    #[must_use]
    pub const fn ppm(self) -> u64 {
        self.0
    }

    /// Returns true if zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// `1.0 - self`, floored at zero.
    #[inline]
    #[must_use]
    pub const fn complement(self) -> Self {
        Self(RATE_SCALE.saturating_sub(self.0))
    }

    /// Approximate value for display only.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / RATE_SCALE as f64
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1 ppm = 0.0001%
        write!(f, "{}.{:04}%", self.0 / 10_000, self.0 % 10_000)
    }
}

impl fmt::Debug for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rate({}ppm)", self.0)
    }
}
