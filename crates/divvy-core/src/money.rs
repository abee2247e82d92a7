//! Currency arithmetic helpers.
//!
//! All monetary values are `rust_decimal::Decimal` rounded to 2 decimal
//! places with half-up (midpoint away from zero) rounding, matching how the
//! admin backend books commission amounts.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to 2 decimal places, half-up.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `premium * percentage / 100`, rounded to currency precision.
pub fn percentage_of(premium: Decimal, percentage: Decimal) -> Decimal {
    round_currency(premium * percentage / Decimal::ONE_HUNDRED)
}
