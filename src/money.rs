//! Conversions between local decimal amounts and the provider's integer
//! representation (minor currency units, basis-point tax rates).
//!
//! Rounding is half away from zero at the point of conversion, in both
//! directions, so a translate/restore cycle never drifts.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

const MINOR_UNITS_PER_MAJOR: Decimal = Decimal::ONE_HUNDRED;

/// Converts a decimal currency amount into integer minor units (cents).
pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * MINOR_UNITS_PER_MAJOR)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Converts integer minor units back into a decimal currency amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Converts a fractional tax rate (e.g. `0.0875`) into basis points (`875`),
/// rounded to the nearest point. Rates are clamped to the 0..=10000 range the
/// provider accepts.
pub fn to_basis_points(rate: Decimal) -> u32 {
    let points = (rate * Decimal::from(10_000u32))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0);
    points.clamp(0, 10_000) as u32
}

/// Converts basis points back into a fractional tax rate.
pub fn from_basis_points(points: u32) -> Decimal {
    Decimal::new(points as i64, 4)
}
