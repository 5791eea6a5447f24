//! Test Data Builders
//!
//! Builders for ledger rows with fixed timestamps, for seeding a store
//! directly without going through the billing service. Only the fields a
//! test cares about need to be set.

use chrono::{DateTime, Utc};
use core_kernel::{BillId, DocumentId, Money, ServiceId};
use domain_billing::{
    Bill, BillTotals, BillWithServices, BilledService, PaymentHistory, Principal,
    SeniorPwdDiscount,
};

use crate::fixtures::{MoneyFixtures, PrincipalFixtures, TemporalFixtures};

/// A line item waiting for its bill
#[derive(Debug, Clone)]
struct PendingLine {
    service_id: Option<ServiceId>,
    name: String,
    category: String,
    price: Money,
    quantity: i32,
}

/// Builder for a bill with its line items
///
/// The total is the consultation fee plus the (discounted) line subtotals
/// unless [`TestBillBuilder::total`] overrides it.
pub struct TestBillBuilder {
    document_id: DocumentId,
    consultation_fee: Money,
    total_override: Option<Money>,
    amount_paid: Money,
    discount: Option<SeniorPwdDiscount>,
    notes: Option<String>,
    archived: bool,
    created_at: DateTime<Utc>,
    principal: Principal,
    lines: Vec<PendingLine>,
}

impl Default for TestBillBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBillBuilder {
    /// Creates a builder for an unpaid bill with a 300 consultation fee
    pub fn new() -> Self {
        Self {
            document_id: DocumentId::new(),
            consultation_fee: MoneyFixtures::consultation_fee(),
            total_override: None,
            amount_paid: Money::zero(),
            discount: None,
            notes: None,
            archived: false,
            created_at: TemporalFixtures::march_at(1, 2),
            principal: PrincipalFixtures::encoder(),
            lines: Vec::new(),
        }
    }

    pub fn document(mut self, id: DocumentId) -> Self {
        self.document_id = id;
        self
    }

    pub fn consultation_fee(mut self, fee: Money) -> Self {
        self.consultation_fee = fee;
        self
    }

    /// Forces the total regardless of the lines
    pub fn total(mut self, total: Money) -> Self {
        self.total_override = Some(total);
        self
    }

    pub fn paid(mut self, amount: Money) -> Self {
        self.amount_paid = amount;
        self
    }

    pub fn discount(mut self, discount: SeniorPwdDiscount) -> Self {
        self.discount = Some(discount);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn archived(mut self) -> Self {
        self.archived = true;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    /// Adds a line linked to a catalog entry
    pub fn line(mut self, service_id: ServiceId, name: &str, category: &str, price: Money, quantity: i32) -> Self {
        self.lines.push(PendingLine {
            service_id: Some(service_id),
            name: name.to_string(),
            category: category.to_string(),
            price,
            quantity,
        });
        self
    }

    /// Adds a line whose catalog entry has been removed
    pub fn orphan_line(mut self, name: &str, category: &str, price: Money, quantity: i32) -> Self {
        self.lines.push(PendingLine {
            service_id: None,
            name: name.to_string(),
            category: category.to_string(),
            price,
            quantity,
        });
        self
    }

    /// Builds the bill and its lines
    pub fn build(self) -> BillWithServices {
        let mut bill = Bill::new(
            self.document_id,
            self.consultation_fee,
            self.discount,
            self.notes,
            &self.principal,
        );
        bill.created_at = self.created_at;
        bill.updated_at = self.created_at;
        if self.archived {
            bill.is_archived = true;
            bill.archived_at = Some(self.created_at);
        }

        let services: Vec<BilledService> = self
            .lines
            .into_iter()
            .map(|pending| {
                let mut line = BilledService::new(
                    bill.id,
                    pending.service_id.unwrap_or_default(),
                    pending.name,
                    pending.category,
                    pending.price,
                    pending.quantity,
                );
                line.service_id = pending.service_id;
                line.created_at = self.created_at;
                line.updated_at = self.created_at;
                line
            })
            .collect();

        bill.recompute(&services);
        if let Some(total) = self.total_override {
            bill.totals = BillTotals::new(total, Money::zero());
        }
        bill.totals = BillTotals::new(bill.total_amount(), self.amount_paid);

        BillWithServices { bill, services }
    }
}

/// Builder for one payment increment
pub struct TestPaymentBuilder {
    bill_id: BillId,
    amount: Money,
    method: String,
    notes: Option<String>,
    principal: Principal,
    at: DateTime<Utc>,
}

impl TestPaymentBuilder {
    pub fn new(bill_id: BillId, amount: Money) -> Self {
        Self {
            bill_id,
            amount,
            method: "cash".to_string(),
            notes: None,
            principal: PrincipalFixtures::encoder(),
            at: TemporalFixtures::march_at(1, 3),
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn build(self) -> PaymentHistory {
        PaymentHistory::new(self.bill_id, self.amount, self.method, self.notes, &self.principal, self.at)
    }
}
