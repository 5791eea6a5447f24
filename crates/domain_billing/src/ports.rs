//! Billing Domain Ports
//!
//! The ledger engines never hold a database handle of their own: each one is
//! constructed with the ports below and reaches storage only through them.
//!
//! - [`LedgerStore`]: reads, audit pruning, [`LedgerStore::begin`] to open a
//!   unit of work and [`LedgerStore::begin_rollup`] to rebuild one day
//! - [`LedgerTx`]: the unit of work. Mutations go through it and become
//!   visible on [`LedgerTx::commit`]; dropping it uncommitted rolls back
//! - [`RollupTx`]: one day's rollup rebuild. Rebuilds of the same date run
//!   one at a time, and the inputs are read under the same lock as the save
//! - [`MasterDataPort`]: read-only access to documents and the service
//!   catalog, which this crate does not own
//!
//! # Adapters
//!
//! - **PostgreSQL**: `infra_db::PgLedgerStore` / `infra_db::PgMasterData`
//! - **In-memory**: [`crate::memory::InMemoryLedgerStore`] /
//!   [`crate::memory::InMemoryMasterData`]
//!
//! ```rust,ignore
//! let mut tx = store.begin().await?;
//! let bill = tx.lock_bill(bill_id).await?.ok_or(BillingError::BillNotFound(bill_id))?;
//! // ... compute next state ...
//! tx.update_bill(&bill).await?;
//! tx.commit().await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{
    AuditLogId, BillId, BilledServiceId, DateRange, DayWindow, DocumentId, DomainPort,
    HealthCheckable, Money, PatientId, PortError, ServiceId,
};

use crate::analytics::{DailySalesAnalytics, DayRollup, ServiceRevenuePoint};
use crate::audit::{AuditLogEntry, AuditSubject};
use crate::bill::{Bill, BillWithServices, BilledService, PaymentHistory, PaymentStatus};
use crate::pagination::{Cursor, KeysetItem, Seek};

/// Filters for bill listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BillFilter {
    pub payment_status: Option<PaymentStatus>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_archived: bool,
}

impl BillFilter {
    /// True if the bill passes every filter
    pub fn matches(&self, bill: &Bill) -> bool {
        if !self.include_archived && bill.is_archived {
            return false;
        }
        if let Some(status) = self.payment_status {
            if bill.payment_status() != status {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if bill.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if bill.created_at >= to {
                return false;
            }
        }
        true
    }
}

impl KeysetItem for Bill {
    fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }
}

/// A medical documentation record as the ledger sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub patient_id: Option<PatientId>,
}

/// A service catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogService {
    pub id: ServiceId,
    pub name: String,
    pub category: String,
    pub price: Money,
    pub is_active: bool,
    pub is_available: bool,
}

/// Read-only master data owned by other parts of the clinic system
#[async_trait]
pub trait MasterDataPort: DomainPort {
    async fn find_document(&self, id: DocumentId) -> Result<Option<DocumentRef>, PortError>;

    async fn find_service(&self, id: ServiceId) -> Result<Option<CatalogService>, PortError>;
}

/// One open unit of work
///
/// Implementations hold whatever isolation they need (a database transaction
/// with the bill row locked, a store-wide mutex) until `commit` or drop.
#[async_trait]
pub trait LedgerTx: Send {
    /// Loads a bill and holds it against concurrent mutation until the
    /// unit of work ends
    async fn lock_bill(&mut self, id: BillId) -> Result<Option<Bill>, PortError>;

    async fn bill_for_document(&mut self, document_id: DocumentId) -> Result<Option<BillId>, PortError>;

    async fn billed_services(&mut self, bill_id: BillId) -> Result<Vec<BilledService>, PortError>;

    async fn find_billed_service(&mut self, id: BilledServiceId) -> Result<Option<BilledService>, PortError>;

    async fn insert_bill(&mut self, bill: &Bill) -> Result<(), PortError>;

    async fn update_bill(&mut self, bill: &Bill) -> Result<(), PortError>;

    async fn insert_billed_service(&mut self, line: &BilledService) -> Result<(), PortError>;

    async fn update_billed_service(&mut self, line: &BilledService) -> Result<(), PortError>;

    async fn delete_billed_service(&mut self, id: BilledServiceId) -> Result<(), PortError>;

    async fn insert_payment(&mut self, payment: &PaymentHistory) -> Result<(), PortError>;

    async fn insert_audit_log(&mut self, entry: &AuditLogEntry) -> Result<(), PortError>;

    /// Makes every write of this unit of work visible at once
    async fn commit(self: Box<Self>) -> Result<(), PortError>;
}

/// One day's rollup rebuild
///
/// Holds the date's lock from `begin_rollup` until commit or drop. Reads
/// see every ledger write committed before the lock was taken.
#[async_trait]
pub trait RollupTx: Send {
    /// Bills created in the window, with their line items
    async fn bills_created_in(&mut self, window: &DayWindow) -> Result<Vec<BillWithServices>, PortError>;

    /// Sum of payment increments recorded in the window
    async fn payments_total_in(&mut self, window: &DayWindow) -> Result<Money, PortError>;

    /// The rollup currently stored for the locked date
    async fn stored_rollup(&mut self) -> Result<Option<DayRollup>, PortError>;

    /// Replaces the day's rollup and returns what was stored
    ///
    /// Service and category rows absent from `rollup` are deleted.
    async fn save(&mut self, rollup: &DayRollup) -> Result<DayRollup, PortError>;

    async fn commit(self: Box<Self>) -> Result<(), PortError>;
}

/// Ledger storage
#[async_trait]
pub trait LedgerStore: DomainPort + HealthCheckable {
    /// Opens a unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, PortError>;

    // ------------------------------------------------------------------------
    // Bills
    // ------------------------------------------------------------------------

    async fn find_bill(&self, id: BillId) -> Result<Option<Bill>, PortError>;

    async fn billed_services(&self, bill_id: BillId) -> Result<Vec<BilledService>, PortError>;

    /// Payments of a bill, oldest first
    async fn payment_history(&self, bill_id: BillId) -> Result<Vec<PaymentHistory>, PortError>;

    /// Filtered bills for one keyset seek, in seek order
    async fn seek_bills(&self, filter: &BillFilter, seek: &Seek) -> Result<Vec<Bill>, PortError>;

    // ------------------------------------------------------------------------
    // Analytics inputs and rollups
    // ------------------------------------------------------------------------

    /// Opens the rebuild of one day, waiting for any other rebuild of it
    async fn begin_rollup(&self, date: NaiveDate) -> Result<Box<dyn RollupTx>, PortError>;

    async fn day_rollup(&self, date: NaiveDate) -> Result<Option<DayRollup>, PortError>;

    /// Daily rows in the range, oldest first
    async fn daily_analytics_range(&self, range: &DateRange) -> Result<Vec<DailySalesAnalytics>, PortError>;

    /// One service's daily rows in the range, oldest first
    async fn service_daily_history(
        &self,
        service_name: &str,
        range: &DateRange,
    ) -> Result<Vec<ServiceRevenuePoint>, PortError>;

    // ------------------------------------------------------------------------
    // Audit trail
    // ------------------------------------------------------------------------

    /// History of one subject, newest first
    async fn audit_history(
        &self,
        subject: AuditSubject,
        subject_id: uuid::Uuid,
    ) -> Result<Vec<AuditLogEntry>, PortError>;

    /// Deletes the given ids from one audit table, returning how many matched
    async fn delete_audit_logs(&self, subject: AuditSubject, ids: &[AuditLogId]) -> Result<u64, PortError>;

    /// Deletes one entry, returning false if it did not exist
    async fn delete_audit_log(&self, subject: AuditSubject, id: AuditLogId) -> Result<bool, PortError>;
}
