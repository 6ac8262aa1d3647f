//! Exact arithmetic helpers for prices and quantities.
//!
//! Everything here works on `rust_decimal::Decimal`; floating point is
//! forbidden for price/quantity math because the ladder compounds
//! multiplicative steps over up to 25 safety orders.

use rust_decimal::Decimal;

use super::error::DomainError;

/// One hundred, for percentage conversions.
pub const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round a quantity down to the nearest multiple of `increment`.
///
/// Exchanges reject orders whose quantity is not a multiple of the
/// pair's minimum quantity step, so all computed quantities pass
/// through here before placement.
pub fn round_down_to_increment(value: Decimal, increment: Decimal) -> Result<Decimal, DomainError> {
    if increment <= Decimal::ZERO {
        return Err(DomainError::NonPositiveValue {
            field: "quantity_increment",
            value: increment,
        });
    }
    let steps = (value / increment).floor();
    Ok(steps * increment)
}

/// Integer power by repeated multiplication.
///
/// Kept explicit rather than pulling in the `maths` feature: exponents
/// here are bounded by the safety-order count.
#[must_use]
pub fn pow_u32(base: Decimal, exp: u32) -> Decimal {
    let mut acc = Decimal::ONE;
    for _ in 0..exp {
        acc *= base;
    }
    acc
}

/// Convert a percentage (e.g. `3`) into a multiplier offset (e.g. `0.03`).
#[must_use]
pub fn pct(value: Decimal) -> Decimal {
    value / HUNDRED
}
