//! Fixed-point money and multiplier arithmetic
//!
//! Stakes, balances and payouts never touch binary floating point. Every
//! value here is an integer count of the smallest representable unit:
//!
//! - `Amount`: 2 decimal places (minor units, e.g. cents)
//! - `Multiplier`: 6 decimal places internally, shown with at least 2
//! - `Ratio`: parts-per-million, used for house edge, growth rate and odds
//!
//! All three serialize as decimal strings so JSON clients never see a
//! float, and deserialize from either strings or plain JSON numbers.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Minor units per whole currency unit.
const AMOUNT_SCALE: u64 = 100;
const AMOUNT_DECIMALS: u32 = 2;

/// Internal units per 1.00x.
const MULTIPLIER_SCALE: u64 = 1_000_000;
const MULTIPLIER_DECIMALS: u32 = 6;

/// Units per centi-multiplier (0.01x).
const CENT_MICROS: u64 = MULTIPLIER_SCALE / 100;

/// Errors from parsing decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFixedError {
    #[error("empty value")]
    Empty,

    #[error("negative values are not allowed")]
    Negative,

    #[error("invalid digit in '{0}'")]
    InvalidDigit(String),

    #[error("too many decimal places: at most {max} allowed")]
    TooPrecise { max: u32 },

    #[error("value out of range")]
    Overflow,
}

/// Parse a non-negative decimal string into an integer scaled by `10^decimals`.
fn parse_fixed(input: &str, decimals: u32) -> Result<u64, ParseFixedError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseFixedError::Empty);
    }
    if s.starts_with('-') {
        return Err(ParseFixedError::Negative);
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(ParseFixedError::InvalidDigit(input.to_string()));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseFixedError::InvalidDigit(input.to_string()));
    }

    // Trailing zeros beyond the precision are harmless ("2.500" for cents).
    let frac = frac.trim_end_matches('0');
    if frac.len() as u32 > decimals {
        return Err(ParseFixedError::TooPrecise { max: decimals });
    }

    let scale = 10u64.pow(decimals);
    let whole_units: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| ParseFixedError::Overflow)?
    };

    let mut frac_units: u64 = 0;
    for (i, c) in frac.chars().enumerate() {
        let digit = c.to_digit(10).unwrap_or(0) as u64;
        frac_units += digit * 10u64.pow(decimals - 1 - i as u32);
    }

    whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or(ParseFixedError::Overflow)
}

/// Format a scaled integer, trimming trailing zeros down to `min_decimals`.
fn format_fixed(value: u64, decimals: u32, min_decimals: u32) -> String {
    let scale = 10u64.pow(decimals);
    let whole = value / scale;
    let frac = value % scale;
    let mut frac_str = format!("{:0width$}", frac, width = decimals as usize);
    while frac_str.len() as u32 > min_decimals && frac_str.ends_with('0') {
        frac_str.pop();
    }
    if frac_str.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac_str)
    }
}

/// Accepts `"12.50"`, `12`, or `12.5` and hands the decimal text to `parse`.
struct FixedVisitor<T> {
    expecting: &'static str,
    parse: fn(&str) -> Result<T, ParseFixedError>,
}

impl<'de, T> de::Visitor<'de> for FixedVisitor<T> {
    type Value = T;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expecting)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<T, E> {
        (self.parse)(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<T, E> {
        (self.parse)(&v.to_string()).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<T, E> {
        (self.parse)(&v.to_string()).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<T, E> {
        if !v.is_finite() {
            return Err(E::custom("non-finite number"));
        }
        // Display for f64 yields the shortest round-tripping decimal text.
        (self.parse)(&v.to_string()).map_err(E::custom)
    }
}

/// A non-negative money amount with 2 decimal places.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Create from minor units (`Amount::from_minor(150)` is 1.50).
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Create from whole units, saturating at the maximum.
    pub const fn from_whole(whole: u64) -> Self {
        Self(whole.saturating_mul(AMOUNT_SCALE))
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Payout for this stake at `multiplier`, truncated to whole minor units.
    ///
    /// Returns `None` only if the result does not fit in a u64.
    pub fn apply(self, multiplier: Multiplier) -> Option<Self> {
        let product = self.0 as u128 * multiplier.0 as u128 / MULTIPLIER_SCALE as u128;
        u64::try_from(product).ok().map(Self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / AMOUNT_SCALE, self.0 % AMOUNT_SCALE)
    }
}

impl FromStr for Amount {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s, AMOUNT_DECIMALS).map(Self)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FixedVisitor {
            expecting: "a non-negative amount with at most 2 decimal places",
            parse: |s| s.parse::<Amount>(),
        })
    }
}

/// A payout multiplier (1.00x and up in practice) with 6 internal decimals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u64);

impl Multiplier {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(MULTIPLIER_SCALE);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Create from hundredths (`from_cents(250)` is 2.50x).
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents.saturating_mul(CENT_MICROS))
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// `self * ratio`, truncated to the internal precision.
    pub fn scale(self, ratio: Ratio) -> Self {
        let product = self.0 as u128 * ratio.ppm() as u128 / MULTIPLIER_SCALE as u128;
        Self(u64::try_from(product).unwrap_or(u64::MAX))
    }

    /// Drop everything below 0.01x. This is the value clients are shown.
    pub const fn truncate_cents(self) -> Self {
        Self(self.0 / CENT_MICROS * CENT_MICROS)
    }

    /// Round half-up to 0.01x.
    pub const fn round_cents(self) -> Self {
        Self((self.0.saturating_add(CENT_MICROS / 2)) / CENT_MICROS * CENT_MICROS)
    }

    pub fn clamp_to(self, min: Self, max: Self) -> Self {
        self.max(min).min(max)
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_fixed(self.0, MULTIPLIER_DECIMALS, 2))
    }
}

impl FromStr for Multiplier {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s, MULTIPLIER_DECIMALS).map(Self)
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FixedVisitor {
            expecting: "a multiplier with at most 6 decimal places",
            parse: |s| s.parse::<Multiplier>(),
        })
    }
}

/// A dimensionless fraction stored as parts-per-million.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ratio(u64);

impl Ratio {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(MULTIPLIER_SCALE);

    pub const fn from_ppm(ppm: u64) -> Self {
        Self(ppm)
    }

    pub const fn ppm(self) -> u64 {
        self.0
    }

    /// `1 - self`, floored at zero.
    pub const fn complement(self) -> Self {
        Self(MULTIPLIER_SCALE.saturating_sub(self.0))
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_fixed(self.0, MULTIPLIER_DECIMALS, 1))
    }
}

impl FromStr for Ratio {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s, MULTIPLIER_DECIMALS).map(Self)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FixedVisitor {
            expecting: "a fraction with at most 6 decimal places",
            parse: |s| s.parse::<Ratio>(),
        })
    }
}
