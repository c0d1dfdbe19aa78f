//! Normalization of raw ledger integers and price rounding

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, SyncError};

/// Minimum number of decimal places used for price sort keys
pub const MIN_SORT_PRECISION: u32 = 5;

/// Largest token precision a `Decimal` can represent exactly
pub const MAX_TOKEN_DECIMALS: u32 = 28;

/// Rounding applied when truncating prices into sort keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Ties round away from zero (ceil for the positive prices on the book)
    #[default]
    HalfUp,
    HalfEven,
    /// Truncate toward zero
    Down,
    /// Round away from zero
    Up,
}

impl RoundingPolicy {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingPolicy::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingPolicy::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingPolicy::Down => RoundingStrategy::ToZero,
            RoundingPolicy::Up => RoundingStrategy::AwayFromZero,
        }
    }

    /// Round `value` to `dp` decimal places
    pub fn round(self, value: Decimal, dp: u32) -> Decimal {
        value.round_dp_with_strategy(dp, self.strategy())
    }
}

impl FromStr for RoundingPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "half_up" => Ok(RoundingPolicy::HalfUp),
            "half_even" => Ok(RoundingPolicy::HalfEven),
            "down" => Ok(RoundingPolicy::Down),
            "up" => Ok(RoundingPolicy::Up),
            other => Err(SyncError::ConfigError(format!(
                "Unknown rounding policy: {}",
                other
            ))),
        }
    }
}

/// Sort key precision: the display precision, but never below five places
pub fn sort_precision(display_precision: u32) -> u32 {
    display_precision.max(MIN_SORT_PRECISION)
}

/// Convert a raw ledger integer into whole-token units
pub fn normalize(raw: u128, decimals: u32) -> Result<Decimal> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(SyncError::ParseError(format!(
            "Token precision {} exceeds {}",
            decimals, MAX_TOKEN_DECIMALS
        )));
    }
    // Whole and fractional parts separately: the raw integer alone may not fit a mantissa
    let unit = 10u128.pow(decimals);
    let out_of_range = || SyncError::ParseError(format!("Raw amount {} out of range", raw));

    let whole = i128::try_from(raw / unit)
        .ok()
        .and_then(|whole| Decimal::try_from_i128_with_scale(whole, 0).ok())
        .ok_or_else(out_of_range)?;
    let fraction = Decimal::try_from_i128_with_scale((raw % unit) as i128, decimals)
        .map_err(|_| out_of_range())?;

    whole
        .checked_add(fraction)
        .map(|d| d.normalize())
        .ok_or_else(out_of_range)
}
