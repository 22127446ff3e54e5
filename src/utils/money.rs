#![allow(dead_code)]
//! Exact-decimal money helpers. Every monetary and price quantity in this
//! crate is `rust_decimal::Decimal` — never a binary float — per the
//! "Monetary representation" and "Decimal arithmetic" rules. The two AMM
//! engines are the only place doubles appear, and only transiently for
//! `exp`/`ln`; callers must immediately quantize back through
//! [`quantize_cents`].

use rust_decimal::Decimal;

pub const MIN_PRICE_CENTS: i32 = 1;
pub const MAX_PRICE_CENTS: i32 = 99;

/// Converts a decimal price in `0.01..=1.00` to integer cents by rounding
/// half-away-from-zero, matching the `round(price * 100)` convention.
pub fn price_to_cents(price: Decimal) -> i32 {
    (price * Decimal::from(100)).round().mantissa() as i32
}

pub fn cents_to_price(cents: i32) -> Decimal {
    Decimal::from(cents) / Decimal::from(100)
}

/// Clamps a raw cents value (possibly computed from a floating-point AMM
/// formula) into the tradeable range `[1, 99]`.
pub fn clamp_cents(cents: i64) -> i32 {
    cents.clamp(MIN_PRICE_CENTS as i64, MAX_PRICE_CENTS as i64) as i32
}

/// Rounds an `f64` probability-in-cents value to the nearest integer cent
/// and clamps it, the same "round then clamp" idiom the source AMMs use
/// before ever touching a `Decimal`.
pub fn quantize_cents(raw: f64) -> i32 {
    clamp_cents(raw.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_to_cents_round_trips_through_cents_to_price() {
        assert_eq!(price_to_cents(dec!(0.55)), 55);
        assert_eq!(cents_to_price(55), dec!(0.55));
    }

    #[test]
    fn clamp_cents_enforces_one_to_ninety_nine() {
        assert_eq!(clamp_cents(0), 1);
        assert_eq!(clamp_cents(100), 99);
        assert_eq!(clamp_cents(42), 42);
    }

    #[test]
    fn quantize_cents_rounds_then_clamps() {
        assert_eq!(quantize_cents(54.6), 55);
        assert_eq!(quantize_cents(-5.0), 1);
        assert_eq!(quantize_cents(150.0), 99);
    }
}
