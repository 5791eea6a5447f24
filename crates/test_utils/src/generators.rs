//! Property-Based Test Generators
//!
//! Proptest strategies for ledger amounts, quantities and timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::Money;
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Positive amounts in centavos, up to 1,000,000.00
pub fn positive_amount_minor_strategy() -> impl Strategy<Value = i64> {
    1i64..100_000_000i64
}

/// Positive peso amounts with two decimal places
pub fn positive_money_strategy() -> impl Strategy<Value = Money> {
    positive_amount_minor_strategy().prop_map(Money::from_minor)
}

/// Consultation fees from 0 to 5,000.00
pub fn fee_strategy() -> impl Strategy<Value = Money> {
    (0i64..500_000i64).prop_map(Money::from_minor)
}

/// Catalog prices from 1.00 to 10,000.00
pub fn price_strategy() -> impl Strategy<Value = Money> {
    (100i64..1_000_000i64).prop_map(Money::from_minor)
}

/// Line item quantities
pub fn quantity_strategy() -> impl Strategy<Value = i32> {
    1i32..20i32
}

/// Discount percentages in `(0, 100]` with up to two decimals
pub fn discount_percentage_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000i64).prop_map(|n| Decimal::new(n, 2))
}

/// A sequence of payment increments
pub fn payment_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Money>> {
    prop::collection::vec(positive_money_strategy(), 1..=max_len)
}

/// Instants within March 2024, at whole minutes
pub fn march_timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..(31 * 24 * 60)).prop_map(|minutes| {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    })
}

/// Instants on the first four hours of March 1, so ties on `created_at` are common
pub fn clustered_timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4i64).prop_map(|hour| Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour))
}
