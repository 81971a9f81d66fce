//! Minor-unit conversions
//!
//! Ledger balances are integer cents; quotes and fee maths are `Decimal`.
//! These helpers are the only place the two representations meet.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{AppError, AppResult};

/// Number of minor units in one major unit (cents per dollar)
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Convert a major-unit amount to minor units.
///
/// Rejects negative amounts and anything with sub-cent precision.
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    if amount.is_sign_negative() {
        return Err(AppError::InvalidInput(format!(
            "Amount must not be negative: {}",
            amount
        )));
    }

    let scaled = amount * Decimal::from(MINOR_UNITS_PER_MAJOR);
    if scaled.fract() != Decimal::ZERO {
        return Err(AppError::InvalidInput(format!(
            "Amount has more than two decimal places: {}",
            amount
        )));
    }

    scaled
        .to_i64()
        .ok_or_else(|| AppError::InvalidInput(format!("Amount out of range: {}", amount)))
}

/// Convert minor units back to a two-decimal major-unit amount
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Floor to whole cents (`floor(x * 100) / 100`)
pub fn floor_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity)
}

/// Floor a decimal amount straight into minor units
pub fn floor_to_minor_units(amount: Decimal) -> AppResult<i64> {
    (floor_cents(amount) * Decimal::from(MINOR_UNITS_PER_MAJOR))
        .to_i64()
        .ok_or_else(|| AppError::InvalidInput(format!("Amount out of range: {}", amount)))
}
