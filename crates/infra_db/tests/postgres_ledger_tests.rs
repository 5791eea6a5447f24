//! PostgreSQL adapter tests
//!
//! These start a container and are ignored by default:
//! `cargo test -p infra_db -- --ignored` with Docker running.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use core_kernel::{AuditLogId, DateRange, Money};
use domain_billing::{
    AuditSubject, BillFilter, BillingError, BillingService, BillingSettings, CreateBillCommand,
    LedgerStore, LineItemRequest, PageRequest, PaymentStatus, RollupTx, SettlePaymentCommand,
};
use infra_db::{PgLedgerStore, PgMasterData};
use test_utils::{
    assert_newest_first, assert_rollup_counts_consistent, assert_totals_consistent,
    get_shared_test_database, CatalogFixtures, PrincipalFixtures, TemporalFixtures, TestBillBuilder,
    TestDatabase,
};

fn service_for(db: &TestDatabase) -> (BillingService, Arc<PgLedgerStore>) {
    let store = Arc::new(PgLedgerStore::new(db.pool().clone()));
    let master = Arc::new(PgMasterData::new(db.pool().clone()));
    let (billing, _worker) = BillingService::new(store.clone(), master, BillingSettings::default());
    (billing, store)
}

async fn create_bill(db: &TestDatabase, billing: &BillingService, fee: Money) -> domain_billing::BillWithServices {
    let document = db.seed_document().await.unwrap();
    let command = CreateBillCommand {
        medical_documentation_id: document.id,
        services: Vec::new(),
        discount: None,
        consultation_fee: fee,
        notes: None,
    };
    billing.create_bill(command, &PrincipalFixtures::encoder()).await.unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_and_read_back() {
    let db = get_shared_test_database().await;
    let (billing, _) = service_for(&db);
    let cbc = CatalogFixtures::cbc();
    db.seed_service(&cbc).await.unwrap();
    let document = db.seed_document().await.unwrap();

    let created = billing
        .create_bill(
            CreateBillCommand {
                medical_documentation_id: document.id,
                services: vec![LineItemRequest { service_id: cbc.id, quantity: 2 }],
                discount: None,
                consultation_fee: Money::new(dec!(300)),
                notes: Some("follow-up".to_string()),
            },
            &PrincipalFixtures::encoder(),
        )
        .await
        .unwrap();

    let loaded = billing.get_bill(created.bill.id).await.unwrap();
    assert_eq!(loaded.bill.total_amount(), Money::new(dec!(800)));
    assert_eq!(loaded.services.len(), 1);
    assert_eq!(loaded.services[0].service_name, "CBC");
    assert_totals_consistent(&loaded.bill);

    let history = billing
        .audit_history(AuditSubject::Bill, created.bill.id.into())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_duplicate_document_is_rejected() {
    let db = get_shared_test_database().await;
    let (billing, _) = service_for(&db);
    let document = db.seed_document().await.unwrap();
    let command = CreateBillCommand {
        medical_documentation_id: document.id,
        services: Vec::new(),
        discount: None,
        consultation_fee: Money::new(dec!(300)),
        notes: None,
    };

    billing.create_bill(command.clone(), &PrincipalFixtures::encoder()).await.unwrap();
    let second = billing.create_bill(command, &PrincipalFixtures::encoder()).await;
    assert!(matches!(second, Err(BillingError::DuplicateBill(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker"]
async fn test_concurrent_settlements_serialize_on_row_lock() {
    let db = get_shared_test_database().await;
    let (billing, store) = service_for(&db);
    let created = create_bill(&db, &billing, Money::new(dec!(1000))).await;
    let bill_id = created.bill.id;

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let billing = billing.clone();
            tokio::spawn(async move {
                billing
                    .settle_payment(
                        bill_id,
                        SettlePaymentCommand::new(Money::new(dec!(100)), "cash"),
                        &PrincipalFixtures::encoder(),
                    )
                    .await
            })
        })
        .collect();

    let mut settled = 0;
    let mut already_paid = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => settled += 1,
            Err(BillingError::AlreadyPaid(_)) => already_paid += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(settled, 10);
    assert_eq!(already_paid, 2);

    let bill = store.find_bill(bill_id).await.unwrap().unwrap();
    assert_eq!(bill.amount_paid(), Money::new(dec!(1000)));
    assert_eq!(bill.payment_status(), PaymentStatus::Paid);
    assert_eq!(store.payment_history(bill_id).await.unwrap().len(), 10);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_keyset_pages_walk_the_listing() {
    let db = create_isolated_database().await;
    let (billing, store) = service_for(&db);

    for hour in [1, 2, 2, 3, 4] {
        let document = db.seed_document().await.unwrap();
        let built = TestBillBuilder::new()
            .document(document.id)
            .created_at(TemporalFixtures::march_at(5, hour))
            .build();
        let mut tx = store.begin().await.unwrap();
        tx.insert_bill(&built.bill).await.unwrap();
        tx.commit().await.unwrap();
    }

    let filter = BillFilter::default();
    let first = billing.list_bills(&filter, &PageRequest::first(2)).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.has_next_page);
    assert!(!first.has_previous_page);
    assert_newest_first(&first);

    let second = billing
        .list_bills(&filter, &PageRequest::next(2, first.end_cursor.clone().unwrap()))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 2);
    assert!(second.has_previous_page);
    assert!(second.items.iter().all(|b| !first.items.iter().any(|f| f.id == b.id)));

    let back = billing
        .list_bills(&filter, &PageRequest::prev(2, second.start_cursor.clone().unwrap()))
        .await
        .unwrap();
    let back_ids: Vec<_> = back.items.iter().map(|b| b.id).collect();
    let first_ids: Vec<_> = first.items.iter().map(|b| b.id).collect();
    assert_eq!(back_ids, first_ids);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rollup_replay_drops_stale_rows() {
    let db = create_isolated_database().await;
    let (billing, store) = service_for(&db);
    let cbc = CatalogFixtures::cbc();
    let xray = CatalogFixtures::chest_xray();
    db.seed_service(&cbc).await.unwrap();
    db.seed_service(&xray).await.unwrap();

    let document = db.seed_document().await.unwrap();
    let built = TestBillBuilder::new()
        .document(document.id)
        .created_at(TemporalFixtures::march_at(2, 2))
        .line(cbc.id, &cbc.name, &cbc.category, cbc.price, 1)
        .line(xray.id, &xray.name, &xray.category, xray.price, 1)
        .build();
    let mut tx = store.begin().await.unwrap();
    tx.insert_bill(&built.bill).await.unwrap();
    for line in &built.services {
        tx.insert_billed_service(line).await.unwrap();
    }
    tx.commit().await.unwrap();

    let date = TemporalFixtures::march(2);
    billing.rebuild_daily_analytics(date).await.unwrap();
    let before = billing.day_analytics(date).await.unwrap();
    assert_eq!(before.services.len(), 2);
    assert_rollup_counts_consistent(&before);

    let xray_line = built.services.iter().find(|l| l.service_name == "Chest X-Ray").unwrap();
    let mut tx = store.begin().await.unwrap();
    tx.delete_billed_service(xray_line.id).await.unwrap();
    tx.commit().await.unwrap();

    billing.rebuild_daily_analytics(date).await.unwrap();
    let after = billing.day_analytics(date).await.unwrap();
    assert_eq!(after.daily.id, before.daily.id);
    assert_eq!(after.services.len(), 1);
    assert_eq!(after.services[0].service_name, "CBC");
    assert_eq!(after.categories.len(), 1);

    let range = DateRange::new(date, date).unwrap();
    assert_eq!(store.daily_analytics_range(&range).await.unwrap().len(), 1);
    assert_eq!(store.service_daily_history("CBC", &range).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires Docker"]
async fn test_rollup_of_one_day_waits_for_the_open_rebuild() {
    let db = create_isolated_database().await;
    let (_billing, store) = service_for(&db);
    let date = TemporalFixtures::march(9);

    let open = store.begin_rollup(date).await.unwrap();
    let waiting = {
        let store = store.clone();
        tokio::spawn(async move { store.begin_rollup(date).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!waiting.is_finished());

    // other dates are not blocked
    let other = store.begin_rollup(TemporalFixtures::march(10)).await.unwrap();
    other.commit().await.unwrap();

    open.commit().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_audit_bulk_delete_across_tables() {
    let db = get_shared_test_database().await;
    let (billing, _) = service_for(&db);
    let created = create_bill(&db, &billing, Money::new(dec!(500))).await;

    let history = billing
        .audit_history(AuditSubject::Bill, created.bill.id.into())
        .await
        .unwrap();
    let mut ids: Vec<AuditLogId> = history.iter().map(|e| e.id).collect();
    ids.push(AuditLogId::new());

    let summary = billing.delete_audit_logs(&ids).await.unwrap();
    assert_eq!(summary.deletion_summary.bill_audit_logs, 1);
    assert!(summary.failures.is_empty());

    let missing = billing.delete_audit_log(AuditSubject::Bill, ids[0]).await;
    assert!(matches!(missing, Err(BillingError::AuditLogNotFound(_))));
}

async fn create_isolated_database() -> TestDatabase {
    test_utils::create_isolated_test_database()
        .await
        .expect("test database should start")
}
