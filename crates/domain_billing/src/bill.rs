//! Bill and line-item model
//!
//! A [`Bill`] is the amount owed and paid for one medical documentation
//! record. Its balance and payment status are never set directly: they live
//! in [`BillTotals`], which derives both from the total and the amount paid
//! every time either changes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{BillId, BilledServiceId, DocumentId, Money, PaymentHistoryId, Rate, ServiceId};

use crate::principal::Principal;

/// Balance at or below which a bill counts as fully paid
///
/// Absorbs sub-centavo residue from fractional payments. With decimal
/// amounts the residue is exact, so the tolerance only matters for inputs
/// such as `999.995` against a total of `1000`.
pub const PAID_TOLERANCE: Decimal = dec!(0.01);

/// Payment status of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Nothing paid yet
    Unpaid,
    /// Some payment received, balance outstanding
    PartiallyPaid,
    /// Balance within tolerance of zero
    Paid,
}

impl PaymentStatus {
    /// Derives the status from the amount paid and the resulting balance
    ///
    /// This is the only way a status is produced.
    pub fn derive(amount_paid: Money, balance: Money) -> Self {
        if !amount_paid.is_positive() {
            PaymentStatus::Unpaid
        } else if balance.amount() <= PAID_TOLERANCE {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "partially_paid" => Ok(PaymentStatus::PartiallyPaid),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Money-accurate running totals of a bill
///
/// # Invariants
///
/// - `balance == max(0, total_amount - amount_paid)`
/// - `payment_status == PaymentStatus::derive(amount_paid, balance)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillTotals {
    total_amount: Money,
    amount_paid: Money,
    balance: Money,
    payment_status: PaymentStatus,
}

impl BillTotals {
    /// Builds totals from the two source-of-truth amounts
    pub fn new(total_amount: Money, amount_paid: Money) -> Self {
        let balance = total_amount.saturating_sub(&amount_paid);
        Self {
            total_amount,
            amount_paid,
            balance,
            payment_status: PaymentStatus::derive(amount_paid, balance),
        }
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    /// Returns totals with a new bill total, keeping payments
    pub fn with_total(&self, total_amount: Money) -> Self {
        Self::new(total_amount, self.amount_paid)
    }

    /// Returns totals after applying one payment increment
    pub fn with_payment(&self, amount: Money) -> Self {
        Self::new(self.total_amount, self.amount_paid + amount)
    }

    /// Snapshot of the fields a settlement changes
    pub fn settlement_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "amountPaid": self.amount_paid,
            "balance": self.balance,
            "paymentStatus": self.payment_status,
        })
    }
}

/// Kind of statutory discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// Senior citizen
    Senior,
    /// Person with disability
    Pwd,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Senior => "senior",
            DiscountKind::Pwd => "pwd",
        }
    }
}

impl FromStr for DiscountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "senior" => Ok(DiscountKind::Senior),
            "pwd" => Ok(DiscountKind::Pwd),
            other => Err(format!("unknown discount kind '{}'", other)),
        }
    }
}

/// A senior citizen / PWD discount applied to a bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeniorPwdDiscount {
    pub kind: DiscountKind,
    /// Discount percentage
    pub rate: Rate,
    /// Senior citizen or PWD identification number
    pub id_number: String,
}

/// Computes a bill total
///
/// The discount applies to the services subtotal; the consultation fee is
/// always charged in full.
pub fn compute_total(
    consultation_fee: Money,
    services: &[BilledService],
    discount: Option<&SeniorPwdDiscount>,
) -> Money {
    let services_subtotal: Money = services.iter().map(|s| s.subtotal).sum();
    let discounted = match discount {
        Some(d) => d.rate.discount(&services_subtotal),
        None => services_subtotal,
    };
    consultation_fee + discounted
}

/// A bill for one medical documentation record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bill {
    pub id: BillId,
    /// Source document (one bill per document)
    pub medical_documentation_id: DocumentId,
    #[serde(flatten)]
    pub totals: BillTotals,
    pub discount: Option<SeniorPwdDiscount>,
    pub consultation_fee: Money,
    pub notes: Option<String>,
    pub last_updated_by_name: Option<String>,
    pub last_updated_by_role: Option<String>,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    /// Creates an unpaid bill
    pub fn new(
        medical_documentation_id: DocumentId,
        consultation_fee: Money,
        discount: Option<SeniorPwdDiscount>,
        notes: Option<String>,
        principal: &Principal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BillId::new_v7(),
            medical_documentation_id,
            totals: BillTotals::new(consultation_fee, Money::zero()),
            discount,
            consultation_fee,
            notes,
            last_updated_by_name: Some(principal.name.clone()),
            last_updated_by_role: Some(principal.role.to_string()),
            is_archived: false,
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_amount(&self) -> Money {
        self.totals.total_amount()
    }

    pub fn amount_paid(&self) -> Money {
        self.totals.amount_paid()
    }

    pub fn balance(&self) -> Money {
        self.totals.balance()
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.totals.payment_status()
    }

    pub fn is_senior_pwd_discount_applied(&self) -> bool {
        self.discount.is_some()
    }

    /// Discount percentage, zero when no discount applies
    pub fn discount_rate(&self) -> Decimal {
        self.discount
            .as_ref()
            .map(|d| d.rate.as_percentage())
            .unwrap_or(Decimal::ZERO)
    }

    /// Recomputes the total from the given line items
    pub fn recompute(&mut self, services: &[BilledService]) {
        let total = compute_total(self.consultation_fee, services, self.discount.as_ref());
        self.totals = self.totals.with_total(total);
    }

    /// Stamps the denormalized "last updated by" columns
    pub fn touch(&mut self, principal: &Principal, at: DateTime<Utc>) {
        self.last_updated_by_name = Some(principal.name.clone());
        self.last_updated_by_role = Some(principal.role.to_string());
        self.updated_at = at;
    }

    /// Full audit snapshot of the bill's tracked fields
    pub fn audit_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "medicalDocumentationId": self.medical_documentation_id,
            "totalAmount": self.total_amount(),
            "amountPaid": self.amount_paid(),
            "balance": self.balance(),
            "paymentStatus": self.payment_status(),
            "consultationFee": self.consultation_fee,
            "isSeniorPwdDiscountApplied": self.is_senior_pwd_discount_applied(),
            "discountKind": self.discount.as_ref().map(|d| d.kind),
            "discountRate": self.discount_rate(),
            "discountIdNumber": self.discount.as_ref().map(|d| d.id_number.clone()),
            "notes": self.notes,
        })
    }
}

/// A priced line item on a bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilledService {
    pub id: BilledServiceId,
    pub bill_id: BillId,
    /// Catalog entry; `None` once the catalog entry has been removed
    pub service_id: Option<ServiceId>,
    pub service_name: String,
    pub service_category: String,
    /// Price snapshot taken when the line was billed
    pub service_price_at_time: Money,
    pub quantity: i32,
    pub subtotal: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BilledService {
    /// Creates a line item with a price snapshot
    pub fn new(
        bill_id: BillId,
        service_id: ServiceId,
        service_name: impl Into<String>,
        service_category: impl Into<String>,
        price: Money,
        quantity: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BilledServiceId::new_v7(),
            bill_id,
            service_id: Some(service_id),
            service_name: service_name.into(),
            service_category: service_category.into(),
            service_price_at_time: price,
            quantity,
            subtotal: price * Decimal::from(quantity),
            created_at: now,
            updated_at: now,
        }
    }

    /// Changes the quantity and recomputes the subtotal from the snapshot price
    pub fn set_quantity(&mut self, quantity: i32, at: DateTime<Utc>) {
        self.quantity = quantity;
        self.subtotal = self.service_price_at_time * Decimal::from(quantity);
        self.updated_at = at;
    }

    pub fn audit_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "billId": self.bill_id,
            "serviceId": self.service_id,
            "serviceName": self.service_name,
            "serviceCategory": self.service_category,
            "servicePriceAtTime": self.service_price_at_time,
            "quantity": self.quantity,
            "subtotal": self.subtotal,
        })
    }
}

/// One payment increment applied to a bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentHistory {
    pub id: PaymentHistoryId,
    pub bill_id: BillId,
    /// The increment, not the cumulative amount
    pub amount_paid: Money,
    pub payment_method: String,
    pub notes: Option<String>,
    pub recorded_by_name: String,
    pub recorded_by_role: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentHistory {
    pub fn new(
        bill_id: BillId,
        amount_paid: Money,
        payment_method: impl Into<String>,
        notes: Option<String>,
        principal: &Principal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentHistoryId::new_v7(),
            bill_id,
            amount_paid,
            payment_method: payment_method.into(),
            notes,
            recorded_by_name: principal.name.clone(),
            recorded_by_role: principal.role.to_string(),
            created_at: at,
        }
    }
}

/// A bill together with its line items
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillWithServices {
    #[serde(flatten)]
    pub bill: Bill,
    pub services: Vec<BilledService>,
}
