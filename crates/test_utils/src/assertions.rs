//! Custom Test Assertions
//!
//! Assertion helpers for ledger types that print the offending values.

use core_kernel::Money;
use domain_billing::{Bill, BillWithServices, DayRollup, Page, PaymentHistory, PaymentStatus};
use rust_decimal::Decimal;

/// Asserts that two amounts differ by at most `tolerance`
pub fn assert_money_approx_eq(actual: &Money, expected: &Money, tolerance: Decimal) {
    let diff = (actual.amount() - expected.amount()).abs();
    assert!(
        diff <= tolerance,
        "Money amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual,
        expected,
        diff,
        tolerance
    );
}

/// Asserts that balance and status agree with total and amount paid
pub fn assert_totals_consistent(bill: &Bill) {
    let expected_balance = bill.total_amount().saturating_sub(&bill.amount_paid());
    assert_eq!(
        bill.balance(),
        expected_balance,
        "Balance out of sync for bill {}: total={}, paid={}",
        bill.id,
        bill.total_amount(),
        bill.amount_paid()
    );
    assert_eq!(
        bill.payment_status(),
        PaymentStatus::derive(bill.amount_paid(), bill.balance()),
        "Status out of sync for bill {}",
        bill.id
    );
}

/// Asserts that the bill total equals its fee plus the discounted line subtotals
pub fn assert_total_matches_lines(entry: &BillWithServices) {
    let subtotal: Money = entry.services.iter().map(|s| s.subtotal).sum();
    let discounted = match &entry.bill.discount {
        Some(discount) => discount.rate.discount(&subtotal),
        None => subtotal,
    };
    assert_eq!(
        entry.bill.total_amount(),
        entry.bill.consultation_fee + discounted,
        "Total of bill {} does not match its lines",
        entry.bill.id
    );
}

/// Asserts that the recorded increments add up to the bill's amount paid
pub fn assert_payments_sum_to_paid(bill: &Bill, payments: &[PaymentHistory]) {
    let sum: Money = payments.iter().map(|p| p.amount_paid).sum();
    assert_eq!(
        sum,
        bill.amount_paid(),
        "Payments for bill {} sum to {} but amount paid is {}",
        bill.id,
        sum,
        bill.amount_paid()
    );
}

/// Asserts that a page is ordered newest first with ties broken by id
pub fn assert_newest_first(page: &Page<Bill>) {
    for pair in page.items.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            (a.created_at, uuid::Uuid::from(a.id)) > (b.created_at, uuid::Uuid::from(b.id)),
            "Page out of order: {} ({}) before {} ({})",
            a.id,
            a.created_at,
            b.id,
            b.created_at
        );
    }
}

/// Asserts that the day's status counts add up to its bill count
pub fn assert_rollup_counts_consistent(rollup: &DayRollup) {
    let daily = &rollup.daily;
    assert_eq!(
        daily.paid_bills + daily.partially_paid_bills + daily.unpaid_bills,
        daily.total_bills,
        "Status counts do not add up for {}",
        daily.date
    );
    for service in &rollup.services {
        assert_eq!(service.daily_analytics_id, daily.id, "Service row {} points at another day", service.service_name);
    }
    for category in &rollup.categories {
        assert_eq!(category.daily_analytics_id, daily.id, "Category row {} points at another day", category.category);
    }
}
