//! Shared setup for the billing integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use core_kernel::{DocumentId, Money, ServiceId};
use domain_billing::{
    AnalyticsMode, Bill, BillTotals, BillWithServices, BilledService, BillingService,
    BillingSettings, CatalogService, CreateBillCommand, DocumentRef, InMemoryLedgerStore,
    InMemoryMasterData, LineItemRequest, Principal, Role,
};

pub fn encoder() -> Principal {
    Principal::new("user-encoder", "Maria Santos", Role::Encoder)
}

pub fn admin() -> Principal {
    Principal::new("user-admin", "Dr. Jose Reyes", Role::Admin)
}

pub fn money(amount: Decimal) -> Money {
    Money::new(amount)
}

pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub master: Arc<InMemoryMasterData>,
    pub billing: BillingService,
    /// CBC, Laboratory, 250.00
    pub cbc: ServiceId,
    /// Chest X-Ray, Imaging, 500.00
    pub xray: ServiceId,
    /// Deactivated ECG
    pub ecg: ServiceId,
    /// Unavailable Ultrasound
    pub ultrasound: ServiceId,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_mode(AnalyticsMode::Inline).await
    }

    pub async fn with_mode(mode: AnalyticsMode) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let master = Arc::new(InMemoryMasterData::new());

        let cbc = add_service(&master, "CBC", "Laboratory", dec!(250), true, true).await;
        let xray = add_service(&master, "Chest X-Ray", "Imaging", dec!(500), true, true).await;
        let ecg = add_service(&master, "ECG", "Cardiology", dec!(400), false, true).await;
        let ultrasound = add_service(&master, "Ultrasound", "Imaging", dec!(1200), true, false).await;

        let settings = BillingSettings {
            analytics_mode: mode,
            ..BillingSettings::default()
        };
        let (billing, _worker) = BillingService::new(store.clone(), master.clone(), settings);

        Self {
            store,
            master,
            billing,
            cbc,
            xray,
            ecg,
            ultrasound,
        }
    }

    pub async fn document(&self) -> DocumentId {
        let id = DocumentId::new();
        self.master
            .add_document(DocumentRef { id, patient_id: None })
            .await;
        id
    }

    pub async fn create_command(&self, fee: Decimal, lines: &[(ServiceId, i32)]) -> CreateBillCommand {
        CreateBillCommand {
            medical_documentation_id: self.document().await,
            services: lines
                .iter()
                .map(|(service_id, quantity)| LineItemRequest {
                    service_id: *service_id,
                    quantity: *quantity,
                })
                .collect(),
            discount: None,
            consultation_fee: money(fee),
            notes: None,
        }
    }

    /// A bill whose total is exactly `total` (consultation fee only)
    pub async fn bill_totalling(&self, total: Decimal) -> BillWithServices {
        let command = self.create_command(total, &[]).await;
        self.billing
            .create_bill(command, &encoder())
            .await
            .expect("bill should be created")
    }
}

async fn add_service(
    master: &InMemoryMasterData,
    name: &str,
    category: &str,
    price: Decimal,
    is_active: bool,
    is_available: bool,
) -> ServiceId {
    let id = ServiceId::new();
    master
        .add_service(CatalogService {
            id,
            name: name.to_string(),
            category: category.to_string(),
            price: money(price),
            is_active,
            is_available,
        })
        .await;
    id
}

/// A bill with fixed timestamps, for seeding the store directly
pub fn seeded_bill(created_at: DateTime<Utc>, total: Decimal, paid: Decimal) -> Bill {
    let mut bill = Bill::new(DocumentId::new(), money(total), None, None, &encoder());
    bill.totals = BillTotals::new(money(total), money(paid));
    bill.created_at = created_at;
    bill.updated_at = created_at;
    bill
}

/// A line for a seeded bill
pub fn seeded_line(bill: &Bill, service_id: Option<ServiceId>, name: &str, category: &str, price: Decimal, quantity: i32) -> BilledService {
    let mut line = BilledService::new(bill.id, ServiceId::new(), name, category, money(price), quantity);
    line.service_id = service_id;
    line.created_at = bill.created_at;
    line.updated_at = bill.created_at;
    line
}

/// Checks the balance/status invariant of a bill
pub fn assert_totals_consistent(bill: &Bill) {
    let expected_balance = bill.total_amount().saturating_sub(&bill.amount_paid());
    assert_eq!(bill.balance(), expected_balance, "balance out of sync for {}", bill.id);
    assert_eq!(
        bill.payment_status(),
        domain_billing::PaymentStatus::derive(bill.amount_paid(), bill.balance()),
        "status out of sync for {}",
        bill.id
    );
}
