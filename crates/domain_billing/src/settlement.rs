//! Payment settlement
//!
//! Settlement moves a bill along `unpaid -> partially_paid -> paid`. The
//! read-compute-write sequence runs inside one unit of work with the bill
//! locked, so two concurrent payments on the same bill are applied one
//! after the other and never from the same snapshot.
//!
//! A fully paid bill rejects further payments without writing anything.
//! Overpayment is accepted: the balance clamps at zero and the excess is not
//! tracked.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use core_kernel::{BillId, ClinicTimezone, Money};

use crate::audit::{AuditAction, AuditRecord, AuditSubject, AuditTrailRecorder, FieldChanges};
use crate::bill::{Bill, PaymentHistory, PaymentStatus};
use crate::error::BillingError;
use crate::ports::LedgerStore;
use crate::principal::Principal;
use crate::trigger::AnalyticsTrigger;

/// One payment increment
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettlePaymentCommand {
    pub amount: Money,
    pub payment_method: String,
    pub notes: Option<String>,
}

impl SettlePaymentCommand {
    pub fn new(amount: Money, payment_method: impl Into<String>) -> Self {
        Self {
            amount,
            payment_method: payment_method.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    fn validate(&self) -> Result<(), BillingError> {
        if !self.amount.is_positive() {
            return Err(BillingError::validation("payment amount must be greater than zero"));
        }
        if self.payment_method.trim().is_empty() {
            return Err(BillingError::validation("payment method is required"));
        }
        Ok(())
    }
}

/// Result of a committed settlement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementOutcome {
    pub bill: Bill,
    pub payment: PaymentHistory,
    /// Set when the post-commit analytics refresh failed
    pub analytics_warning: Option<String>,
}

/// Applies payments to bills
#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    audit: AuditTrailRecorder,
    trigger: Arc<dyn AnalyticsTrigger>,
    timezone: ClinicTimezone,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        trigger: Arc<dyn AnalyticsTrigger>,
        timezone: ClinicTimezone,
    ) -> Self {
        Self {
            audit: AuditTrailRecorder::new(store.clone()),
            store,
            trigger,
            timezone,
        }
    }

    /// Applies one payment increment
    #[instrument(skip(self, command, principal), fields(bill_id = %bill_id, amount = %command.amount))]
    pub async fn settle(
        &self,
        bill_id: BillId,
        command: SettlePaymentCommand,
        principal: &Principal,
    ) -> Result<SettlementOutcome, BillingError> {
        command.validate()?;

        let mut tx = self.store.begin().await?;
        let mut bill = tx
            .lock_bill(bill_id)
            .await?
            .ok_or(BillingError::BillNotFound(bill_id))?;

        if bill.payment_status() == PaymentStatus::Paid {
            return Err(BillingError::AlreadyPaid(bill_id));
        }
        if bill.is_archived {
            return Err(BillingError::Archived(bill_id));
        }

        let before = bill.totals.settlement_snapshot();
        bill.totals = bill.totals.with_payment(command.amount);
        let after = bill.totals.settlement_snapshot();

        let payment = PaymentHistory::new(
            bill_id,
            command.amount,
            command.payment_method.trim(),
            command.notes,
            principal,
            chrono::Utc::now(),
        );
        bill.touch(principal, payment.created_at);

        tx.update_bill(&bill).await?;
        tx.insert_payment(&payment).await?;
        self.audit
            .record(
                tx.as_mut(),
                AuditRecord::changed(
                    AuditSubject::Bill,
                    bill_id,
                    AuditAction::PaymentRecorded,
                    FieldChanges::from_snapshots(before, after),
                ),
                principal,
            )
            .await?;
        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            amount_paid = %bill.amount_paid(),
            balance = %bill.balance(),
            payment_status = %bill.payment_status(),
            "Payment settled"
        );

        let date = self.timezone.local_date(payment.created_at);
        let analytics_warning = match self.trigger.day_changed(date).await {
            Ok(()) => None,
            Err(e) => {
                warn!(%date, error = %e, "Analytics refresh failed after settlement");
                Some(format!("analytics for {} could not be refreshed: {}", date, e))
            }
        };

        Ok(SettlementOutcome {
            bill,
            payment,
            analytics_warning,
        })
    }
}
