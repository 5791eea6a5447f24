//! Listing, analytics replay and forecasting tests

mod common;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;

use core_kernel::{ClinicTimezone, Money};
use domain_billing::{
    AnalyticsMode, BillFilter, BillWithServices, BillingService, BillingSettings, Cursor,
    ErrorKind, Forecast, InMemoryLedgerStore, InMemoryMasterData, PageRequest, PaymentHistory,
    PaymentStatus, RevenueTrend, SettlePaymentCommand, TrendDirection, UpdateBillCommand,
};

use common::{assert_totals_consistent, encoder, money, seeded_bill, seeded_line, Harness};

fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap())
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

async fn seed(store: &InMemoryLedgerStore, created_at: DateTime<Utc>, total: Decimal, paid: Decimal) -> domain_billing::Bill {
    let bill = seeded_bill(created_at, total, paid);
    store
        .seed_bill(BillWithServices {
            bill: bill.clone(),
            services: Vec::new(),
        })
        .await;
    bill
}

async fn seed_payment(store: &InMemoryLedgerStore, bill: &domain_billing::Bill, amount: Decimal, when: DateTime<Utc>) {
    store
        .seed_payment(PaymentHistory::new(bill.id, money(amount), "cash", None, &encoder(), when))
        .await;
}

// ============================================================================
// Listing
// ============================================================================

mod listing_tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_pages() {
        // Scenario E
        let h = Harness::new().await;
        let oldest = seed(&h.store, at(day(1), 9), dec!(100), dec!(0)).await;
        let middle = seed(&h.store, at(day(2), 9), dec!(200), dec!(0)).await;
        let newest = seed(&h.store, at(day(3), 9), dec!(300), dec!(0)).await;

        let filter = BillFilter::default();
        let first = h.billing.list_bills(&filter, &PageRequest::first(2)).await.unwrap();
        let ids: Vec<_> = first.items.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![newest.id, middle.id]);
        assert!(first.has_next_page);
        assert!(!first.has_previous_page);

        let end_cursor = first.end_cursor.clone().unwrap();
        assert_eq!(end_cursor, Cursor::new(middle.created_at, middle.id).encode());

        let second = h.billing.list_bills(&filter, &PageRequest::next(2, end_cursor)).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id, oldest.id);
        assert!(!second.has_next_page);
        assert!(second.has_previous_page);
    }

    #[tokio::test]
    async fn test_backward_page_returns_newer_rows_in_display_order() {
        let h = Harness::new().await;
        let mut seeded = Vec::new();
        for d in 1..=5 {
            seeded.push(seed(&h.store, at(day(d), 9), dec!(100), dec!(0)).await);
        }
        let filter = BillFilter::default();

        let first = h.billing.list_bills(&filter, &PageRequest::first(2)).await.unwrap();
        let second = h
            .billing
            .list_bills(&filter, &PageRequest::next(2, first.end_cursor.clone().unwrap()))
            .await
            .unwrap();
        let ids: Vec<_> = second.items.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![seeded[2].id, seeded[1].id]);

        let back = h
            .billing
            .list_bills(&filter, &PageRequest::prev(2, second.start_cursor.clone().unwrap()))
            .await
            .unwrap();
        assert_eq!(back.items, first.items);
        assert!(!back.has_previous_page);
        assert!(back.has_next_page);
    }

    #[tokio::test]
    async fn test_backward_page_from_last_end_cursor() {
        let h = Harness::new().await;
        let mut seeded = Vec::new();
        for d in 1..=5 {
            seeded.push(seed(&h.store, at(day(d), 9), dec!(100), dec!(0)).await);
        }
        let filter = BillFilter::default();

        let first = h.billing.list_bills(&filter, &PageRequest::first(2)).await.unwrap();
        let second = h
            .billing
            .list_bills(&filter, &PageRequest::next(2, first.end_cursor.clone().unwrap()))
            .await
            .unwrap();
        let last = h
            .billing
            .list_bills(&filter, &PageRequest::next(2, second.end_cursor.clone().unwrap()))
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, seeded[0].id);
        assert!(!last.has_next_page);

        // the cursor row itself is excluded; the two rows just newer come back newest first
        let back = h
            .billing
            .list_bills(&filter, &PageRequest::prev(2, last.end_cursor.clone().unwrap()))
            .await
            .unwrap();
        let ids: Vec<_> = back.items.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![seeded[2].id, seeded[1].id]);
        assert_eq!(back.items, second.items);
        assert!(back.has_previous_page);
        assert!(back.has_next_page);
        assert_eq!(back.start_cursor, second.start_cursor);
        assert_eq!(back.end_cursor, second.end_cursor);
    }

    #[tokio::test]
    async fn test_prev_without_cursor_is_first_page() {
        let h = Harness::new().await;
        for d in 1..=3 {
            seed(&h.store, at(day(d), 9), dec!(100), dec!(0)).await;
        }
        let request = PageRequest {
            limit: Some(2),
            cursor: None,
            direction: domain_billing::Direction::Prev,
        };

        let page = h.billing.list_bills(&BillFilter::default(), &request).await.unwrap();
        let first = h.billing.list_bills(&BillFilter::default(), &PageRequest::first(2)).await.unwrap();
        assert_eq!(page, first);
    }

    #[tokio::test]
    async fn test_limit_is_clamped_and_bad_cursor_rejected() {
        let h = Harness::new().await;
        for d in 1..=3 {
            seed(&h.store, at(day(d), 9), dec!(100), dec!(0)).await;
        }

        let page = h.billing.list_bills(&BillFilter::default(), &PageRequest::first(0)).await.unwrap();
        assert_eq!(page.items.len(), 1);

        let page = h.billing.list_bills(&BillFilter::default(), &PageRequest::first(10_000)).await.unwrap();
        assert_eq!(page.items.len(), 3);

        let err = h
            .billing
            .list_bills(&BillFilter::default(), &PageRequest::next(2, "not-a-cursor"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_filters() {
        let h = Harness::new().await;
        let unpaid = seed(&h.store, at(day(1), 9), dec!(100), dec!(0)).await;
        let paid = seed(&h.store, at(day(2), 9), dec!(100), dec!(100)).await;
        let partial = seed(&h.store, at(day(3), 9), dec!(100), dec!(40)).await;

        let mut archived = seeded_bill(at(day(4), 9), dec!(100), dec!(0));
        archived.is_archived = true;
        archived.archived_at = Some(at(day(4), 10));
        h.store
            .seed_bill(BillWithServices {
                bill: archived.clone(),
                services: Vec::new(),
            })
            .await;

        let everything = h.billing.list_bills(&BillFilter::default(), &PageRequest::first(10)).await.unwrap();
        assert_eq!(everything.items.len(), 3);
        assert!(everything.items.iter().all(|b| b.id != archived.id));

        let with_archived = BillFilter {
            include_archived: true,
            ..Default::default()
        };
        let page = h.billing.list_bills(&with_archived, &PageRequest::first(10)).await.unwrap();
        assert_eq!(page.items.len(), 4);

        let only_partial = BillFilter {
            payment_status: Some(PaymentStatus::PartiallyPaid),
            ..Default::default()
        };
        let page = h.billing.list_bills(&only_partial, &PageRequest::first(10)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, partial.id);

        let date_window = BillFilter {
            created_from: Some(at(day(1), 0)),
            created_to: Some(at(day(3), 0)),
            ..Default::default()
        };
        let page = h.billing.list_bills(&date_window, &PageRequest::first(10)).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![paid.id, unpaid.id]);
    }
}

// ============================================================================
// Daily analytics
// ============================================================================

mod analytics_tests {
    use super::*;

    #[tokio::test]
    async fn test_revenue_lands_on_payment_day() {
        let h = Harness::new().await;
        let bill = seed(&h.store, at(day(10), 9), dec!(1000), dec!(600)).await;
        seed_payment(&h.store, &bill, dec!(600), at(day(11), 14)).await;

        let created_day = h.billing.rebuild_daily_analytics(day(10)).await.unwrap();
        assert_eq!(created_day.total_bills, 1);
        assert_eq!(created_day.partially_paid_bills, 1);
        assert_eq!(created_day.total_revenue, Money::zero());
        assert_eq!(created_day.average_bill_amount.amount(), dec!(1000));

        let payment_day = h.billing.rebuild_daily_analytics(day(11)).await.unwrap();
        assert_eq!(payment_day.total_bills, 0);
        assert_eq!(payment_day.total_revenue.amount(), dec!(600));
    }

    #[tokio::test]
    async fn test_status_counts_use_exact_amounts() {
        let h = Harness::new().await;
        seed(&h.store, at(day(5), 8), dec!(1000), dec!(0)).await;
        seed(&h.store, at(day(5), 9), dec!(1000), dec!(1000)).await;
        seed(&h.store, at(day(5), 10), dec!(1000), dec!(1200)).await;
        let residue = seed(&h.store, at(day(5), 11), dec!(1000), dec!(999.995)).await;
        assert_eq!(residue.payment_status(), PaymentStatus::Paid);

        let daily = h.billing.rebuild_daily_analytics(day(5)).await.unwrap();
        assert_eq!(daily.total_bills, 4);
        assert_eq!(daily.unpaid_bills, 1);
        assert_eq!(daily.paid_bills, 2);
        assert_eq!(daily.partially_paid_bills, 1);
    }

    #[tokio::test]
    async fn test_day_boundaries_follow_clinic_timezone() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let settings = BillingSettings {
            timezone: "Asia/Manila".parse::<ClinicTimezone>().unwrap(),
            ..BillingSettings::default()
        };
        let (billing, _) = BillingService::new(store.clone(), Arc::new(InMemoryMasterData::new()), settings);

        // 17:00 UTC on the 10th is 01:00 on the 11th in Manila
        let bill = seed(&store, at(day(10), 17), dec!(500), dec!(500)).await;
        seed_payment(&store, &bill, dec!(500), at(day(10), 17)).await;

        let tenth = billing.rebuild_daily_analytics(day(10)).await.unwrap();
        assert_eq!(tenth.total_bills, 0);
        assert_eq!(tenth.total_revenue, Money::zero());

        let eleventh = billing.rebuild_daily_analytics(day(11)).await.unwrap();
        assert_eq!(eleventh.total_bills, 1);
        assert_eq!(eleventh.total_revenue.amount(), dec!(500));
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let h = Harness::new().await;
        let bill = seeded_bill(at(day(7), 9), dec!(1250), dec!(0));
        let services = vec![
            seeded_line(&bill, Some(h.cbc), "CBC", "Laboratory", dec!(250), 3),
            seeded_line(&bill, Some(h.xray), "Chest X-Ray", "Imaging", dec!(500), 1),
        ];
        h.store.seed_bill(BillWithServices { bill, services }).await;

        h.billing.rebuild_daily_analytics(day(7)).await.unwrap();
        let first = h.billing.day_analytics(day(7)).await.unwrap();
        h.billing.rebuild_daily_analytics(day(7)).await.unwrap();
        let second = h.billing.day_analytics(day(7)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.services.len(), 2);
        assert_eq!(first.categories.len(), 2);

        let cbc = first.services.iter().find(|s| s.service_name == "CBC").unwrap();
        assert_eq!(cbc.quantity_sold, 3);
        assert_eq!(cbc.total_revenue.amount(), dec!(750));
        assert_eq!(cbc.average_price.amount(), dec!(250));
    }

    #[tokio::test]
    async fn test_lines_of_removed_catalog_entries_group_by_name() {
        let h = Harness::new().await;
        let first = seeded_bill(at(day(8), 9), dec!(300), dec!(0));
        let second = seeded_bill(at(day(8), 10), dec!(300), dec!(0));
        let lines_first = vec![seeded_line(&first, None, "Urinalysis", "Laboratory", dec!(150), 2)];
        let lines_second = vec![seeded_line(&second, None, "Urinalysis", "Laboratory", dec!(150), 2)];
        h.store.seed_bill(BillWithServices { bill: first, services: lines_first }).await;
        h.store.seed_bill(BillWithServices { bill: second, services: lines_second }).await;

        h.billing.rebuild_daily_analytics(day(8)).await.unwrap();
        let rollup = h.billing.day_analytics(day(8)).await.unwrap();

        assert_eq!(rollup.services.len(), 1);
        assert_eq!(rollup.services[0].service_id, None);
        assert_eq!(rollup.services[0].quantity_sold, 4);
        assert_eq!(rollup.categories[0].total_revenue.amount(), dec!(600));
    }

    #[tokio::test]
    async fn test_rebuild_drops_rows_for_removed_lines() {
        let h = Harness::new().await;
        let created = h
            .billing
            .create_bill(h.create_command(dec!(0), &[(h.cbc, 1), (h.xray, 1)]).await, &encoder())
            .await
            .unwrap();
        let today = created.bill.created_at.date_naive();

        h.billing.rebuild_daily_analytics(today).await.unwrap();
        assert_eq!(h.billing.day_analytics(today).await.unwrap().services.len(), 2);

        let xray_line = created.services.iter().find(|l| l.service_id == Some(h.xray)).unwrap().id;
        let update = UpdateBillCommand {
            services_to_remove: vec![xray_line],
            ..Default::default()
        };
        h.billing.update_bill(created.bill.id, update, &encoder()).await.unwrap();
        h.billing.rebuild_daily_analytics(today).await.unwrap();

        let rollup = h.billing.day_analytics(today).await.unwrap();
        assert_eq!(rollup.services.len(), 1);
        assert_eq!(rollup.services[0].service_name, "CBC");
        assert_eq!(rollup.categories.len(), 1);
    }

    #[tokio::test]
    async fn test_settlement_refreshes_the_payment_day() {
        let h = Harness::new().await;
        let bill = h.bill_totalling(dec!(800)).await.bill;

        let outcome = h
            .billing
            .settle_payment(bill.id, SettlePaymentCommand::new(money(dec!(300)), "gcash"), &encoder())
            .await
            .unwrap();
        assert!(outcome.analytics_warning.is_none());

        let today = outcome.payment.created_at.date_naive();
        let rollup = h.billing.day_analytics(today).await.unwrap();
        assert_eq!(rollup.daily.total_revenue.amount(), dec!(300));
        assert_eq!(rollup.daily.partially_paid_bills, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_rebuilds_of_one_day_keep_every_payment() {
        let h = Harness::new().await;
        let first = h.bill_totalling(dec!(800)).await.bill;
        let second = h.bill_totalling(dec!(800)).await.bill;

        // the first rebuild stalls after reading the day's payments
        let pause = h.store.pause_next_rollup().await;
        let settle_first = {
            let billing = h.billing.clone();
            tokio::spawn(async move {
                billing
                    .settle_payment(first.id, SettlePaymentCommand::new(money(dec!(100)), "cash"), &encoder())
                    .await
            })
        };
        pause.reached().await;

        let settle_second = {
            let billing = h.billing.clone();
            tokio::spawn(async move {
                billing
                    .settle_payment(second.id, SettlePaymentCommand::new(money(dec!(200)), "cash"), &encoder())
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        pause.release();

        let first_outcome = settle_first.await.unwrap().unwrap();
        let second_outcome = settle_second.await.unwrap().unwrap();
        assert!(first_outcome.analytics_warning.is_none());
        assert!(second_outcome.analytics_warning.is_none());

        let today = second_outcome.payment.created_at.date_naive();
        let rollup = h.billing.day_analytics(today).await.unwrap();
        assert_eq!(rollup.daily.total_revenue.amount(), dec!(300));
        assert_eq!(rollup.daily.partially_paid_bills, 2);
    }

    #[tokio::test]
    async fn test_queued_mode_catches_up() {
        let h = Harness::with_mode(AnalyticsMode::Queued).await;
        let bill = h.bill_totalling(dec!(800)).await.bill;

        let outcome = h
            .billing
            .settle_payment(bill.id, SettlePaymentCommand::new(money(dec!(800)), "cash"), &encoder())
            .await
            .unwrap();
        let today = outcome.payment.created_at.date_naive();

        let mut rollup = None;
        for _ in 0..100 {
            if let Ok(found) = h.billing.day_analytics(today).await {
                rollup = Some(found);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let rollup = rollup.expect("worker should rebuild the day");
        assert_eq!(rollup.daily.total_revenue.amount(), dec!(800));
        assert_eq!(rollup.daily.paid_bills, 1);
    }

    #[tokio::test]
    async fn test_missing_day_is_not_found() {
        let h = Harness::new().await;
        let err = h.billing.day_analytics(day(1)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}

// ============================================================================
// Trends and forecasts
// ============================================================================

mod forecast_tests {
    use super::*;

    async fn seed_growing_revenue(h: &Harness, days: u32) {
        for d in 1..=days {
            let amount = Decimal::from(1000 + 100 * d);
            let bill = seed(&h.store, at(day(d), 9), amount, amount).await;
            seed_payment(&h.store, &bill, amount, at(day(d), 10)).await;
            h.billing.rebuild_daily_analytics(day(d)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_increasing_revenue_is_projected() {
        let h = Harness::new().await;
        seed_growing_revenue(&h, 7).await;

        let trend = h.billing.revenue_trend(day(1), day(7)).await.unwrap();
        match trend {
            RevenueTrend::Computed { direction, points, .. } => {
                assert_eq!(direction, TrendDirection::Increasing);
                assert_eq!(points, 7);
            }
            other => panic!("expected a computed trend, got {other:?}"),
        }

        let forecast = h.billing.revenue_forecast(day(1), day(7), 3).await.unwrap();
        match forecast {
            Forecast::Projected { projections, .. } => {
                assert_eq!(projections.len(), 3);
                assert_eq!(projections[0].date, day(8));
                assert_eq!(projections[0].projected_revenue.amount(), dec!(1800));
                assert!(projections[2].projected_revenue > projections[0].projected_revenue);
            }
            other => panic!("expected a projection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_too_few_days_is_reported() {
        let h = Harness::new().await;
        seed_growing_revenue(&h, 3).await;

        let forecast = h.billing.revenue_forecast(day(1), day(31), 7).await.unwrap();
        assert!(forecast.is_insufficient());

        let trend = h.billing.revenue_trend(day(1), day(31)).await.unwrap();
        assert!(matches!(trend, RevenueTrend::InsufficientData { points: 3, .. }));
    }

    #[tokio::test]
    async fn test_horizon_and_range_are_validated() {
        let h = Harness::new().await;

        let err = h.billing.revenue_forecast(day(1), day(7), 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = h.billing.revenue_forecast(day(1), day(7), 91).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = h.billing.daily_analytics(day(7), day(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_service_history_and_forecast() {
        let h = Harness::new().await;
        for d in 1..=7 {
            let bill = seeded_bill(at(day(d), 9), dec!(250), dec!(0));
            let services = vec![seeded_line(&bill, Some(h.cbc), "CBC", "Laboratory", dec!(250), d as i32)];
            h.store.seed_bill(BillWithServices { bill, services }).await;
            h.billing.rebuild_daily_analytics(day(d)).await.unwrap();
        }

        let history = h.billing.service_analytics("CBC", day(1), day(7)).await.unwrap();
        assert_eq!(history.len(), 7);
        assert_eq!(history[6].quantity_sold, 7);
        assert!(history.windows(2).all(|w| w[0].date < w[1].date));

        let forecast = h.billing.service_revenue_forecast("CBC", day(1), day(7), 2).await.unwrap();
        assert!(!forecast.is_insufficient());
        assert!(h
            .billing
            .service_revenue_forecast("Unknown", day(1), day(7), 2)
            .await
            .unwrap()
            .is_insufficient());
    }
}

// ============================================================================
// Properties
// ============================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_totals_stay_consistent(
        total_cents in 1i64..500_000,
        payments in prop::collection::vec(1i64..200_000, 1..8),
    ) {
        runtime().block_on(async {
            let h = Harness::new().await;
            let bill = h.bill_totalling(Decimal::new(total_cents, 2)).await.bill;
            let mut paid = Money::zero();

            for cents in payments {
                let command = SettlePaymentCommand::new(Money::from_minor(cents), "cash");
                match h.billing.settle_payment(bill.id, command, &encoder()).await {
                    Ok(outcome) => {
                        paid = paid + Money::from_minor(cents);
                        assert_eq!(outcome.bill.amount_paid(), paid);
                        assert_totals_consistent(&outcome.bill);
                    }
                    Err(err) => {
                        assert_eq!(err.kind(), ErrorKind::Conflict);
                        let stored = h.billing.get_bill(bill.id).await.unwrap().bill;
                        assert_eq!(stored.payment_status(), PaymentStatus::Paid);
                    }
                }
            }

            let payments = h.billing.bill_payments(bill.id).await.unwrap();
            let recorded: Money = payments.iter().map(|p| p.amount_paid).sum();
            assert_eq!(recorded, paid);
        });
    }

    #[test]
    fn prop_pages_cover_every_bill_once(
        hours in prop::collection::vec(0u32..4, 1..25),
        limit in 1u32..6,
    ) {
        runtime().block_on(async {
            let h = Harness::new().await;
            let mut expected = Vec::new();
            for hour in &hours {
                let bill = seed(&h.store, at(day(1), *hour), dec!(100), dec!(0)).await;
                expected.push(bill);
            }
            expected.sort_by_key(|b| std::cmp::Reverse((b.created_at, b.id)));

            let filter = BillFilter::default();
            let mut seen = Vec::new();
            let mut request = PageRequest::first(limit);
            loop {
                let page = h.billing.list_bills(&filter, &request).await.unwrap();
                assert!(page.items.len() <= limit as usize);
                seen.extend(page.items.iter().map(|b| b.id));
                if !page.has_next_page {
                    break;
                }
                request = PageRequest::next(limit, page.end_cursor.clone().unwrap());
            }

            let unique: HashSet<_> = seen.iter().collect();
            assert_eq!(unique.len(), seen.len());
            let expected_ids: Vec<_> = expected.iter().map(|b| b.id).collect();
            assert_eq!(seen, expected_ids);
        });
    }
}
