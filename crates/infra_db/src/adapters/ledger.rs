//! PostgreSQL Ledger Adapter
//!
//! [`PgLedgerStore`] implements [`LedgerStore`] over a connection pool and
//! [`PgLedgerTx`] implements [`LedgerTx`] over one open transaction.
//!
//! # Units of work
//!
//! `begin` opens a database transaction. `lock_bill` reads the bill with
//! `SELECT ... FOR UPDATE`, so two settlements of the same bill serialize on
//! the row lock and the second one sees the first one's committed totals.
//! Dropping a [`PgLedgerTx`] without committing rolls the transaction back.
//!
//! `begin_rollup` opens a transaction and takes
//! `pg_advisory_xact_lock(namespace, date)` before anything else. The day's
//! bills, payments and stored rollup are read on that transaction and the
//! save commits it, so rebuilds of one date run one at a time and the last
//! one to commit has read every payment committed before it started.
//!
//! # Error Handling
//!
//! Database errors are classified by SQLSTATE in [`DatabaseError`] and then
//! converted to [`PortError`]:
//! - unique violation -> `PortError::Conflict`
//! - foreign key violation -> `PortError::InvalidReference`
//! - serialization failure / deadlock -> `PortError::Conflict`
//! - connection and pool errors -> `PortError::Connection`

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use core_kernel::{
    AdapterHealth, AuditLogId, BillId, BilledServiceId, DateRange, DayWindow, DocumentId,
    DomainPort, HealthCheckResult, HealthCheckable, Money, PortError,
};
use domain_billing::pagination::Seek;
use domain_billing::{
    AuditLogEntry, AuditSubject, Bill, BillFilter, BillWithServices, BilledService,
    DailySalesAnalytics, DayRollup, LedgerStore, LedgerTx, PaymentHistory, RollupTx,
    ServiceRevenuePoint,
};

use crate::error::DatabaseError;
use crate::repositories::{analytics, audit, bills};

/// PostgreSQL-backed ledger storage
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_rollup(
        conn: &mut sqlx::PgConnection,
        date: NaiveDate,
    ) -> Result<Option<DayRollup>, DatabaseError> {
        let Some(daily) = analytics::find_daily(&mut *conn, date).await? else {
            return Ok(None);
        };
        let services = analytics::services_of_day(&mut *conn, daily.id).await?;
        let categories = analytics::categories_of_day(&mut *conn, daily.id).await?;
        Ok(Some(DayRollup { daily, services, categories }))
    }
}

impl DomainPort for PgLedgerStore {}

#[async_trait]
impl HealthCheckable for PgLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(_) => (AdapterHealth::Healthy, None),
            Err(e) => (AdapterHealth::Unhealthy, Some(format!("Database error: {}", e))),
        };
        HealthCheckResult {
            adapter_id: "postgres-ledger-store".to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self))]
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, PortError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    #[instrument(skip(self), fields(bill_id = %id))]
    async fn find_bill(&self, id: BillId) -> Result<Option<Bill>, PortError> {
        Ok(bills::find_bill(&self.pool, id, false).await?)
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn billed_services(&self, bill_id: BillId) -> Result<Vec<BilledService>, PortError> {
        Ok(bills::billed_services_of(&self.pool, bill_id).await?)
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn payment_history(&self, bill_id: BillId) -> Result<Vec<PaymentHistory>, PortError> {
        Ok(bills::payments_of(&self.pool, bill_id).await?)
    }

    #[instrument(skip(self, filter, seek), fields(limit = seek.limit))]
    async fn seek_bills(&self, filter: &BillFilter, seek: &Seek) -> Result<Vec<Bill>, PortError> {
        Ok(bills::seek_bills(&self.pool, filter, seek).await?)
    }

    #[instrument(skip(self))]
    async fn begin_rollup(&self, date: NaiveDate) -> Result<Box<dyn RollupTx>, PortError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        analytics::lock_rollup_day(&mut *tx, date).await?;
        debug!("Rollup lock acquired");
        Ok(Box::new(PgRollupTx { tx, date }))
    }

    #[instrument(skip(self))]
    async fn day_rollup(&self, date: NaiveDate) -> Result<Option<DayRollup>, PortError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        Ok(Self::load_rollup(&mut *conn, date).await?)
    }

    #[instrument(skip(self, range), fields(start = %range.start, end = %range.end))]
    async fn daily_analytics_range(&self, range: &DateRange) -> Result<Vec<DailySalesAnalytics>, PortError> {
        Ok(analytics::daily_between(&self.pool, range.start, range.end).await?)
    }

    #[instrument(skip(self, range), fields(start = %range.start, end = %range.end))]
    async fn service_daily_history(
        &self,
        service_name: &str,
        range: &DateRange,
    ) -> Result<Vec<ServiceRevenuePoint>, PortError> {
        Ok(analytics::service_between(&self.pool, service_name, range.start, range.end).await?)
    }

    #[instrument(skip(self), fields(table = subject.table_name()))]
    async fn audit_history(&self, subject: AuditSubject, subject_id: Uuid) -> Result<Vec<AuditLogEntry>, PortError> {
        Ok(audit::history(&self.pool, subject, subject_id).await?)
    }

    #[instrument(skip(self, ids), fields(table = subject.table_name(), count = ids.len()))]
    async fn delete_audit_logs(&self, subject: AuditSubject, ids: &[AuditLogId]) -> Result<u64, PortError> {
        Ok(audit::delete_entries(&self.pool, subject, ids).await?)
    }

    #[instrument(skip(self), fields(table = subject.table_name(), audit_id = %id))]
    async fn delete_audit_log(&self, subject: AuditSubject, id: AuditLogId) -> Result<bool, PortError> {
        let removed = audit::delete_entries(&self.pool, subject, &[id]).await?;
        Ok(removed > 0)
    }
}

/// One day's rollup rebuild, holding the day's advisory lock
#[derive(Debug)]
pub struct PgRollupTx {
    tx: Transaction<'static, Postgres>,
    date: NaiveDate,
}

#[async_trait]
impl RollupTx for PgRollupTx {
    #[instrument(skip(self, window), fields(date = %window.date))]
    async fn bills_created_in(&mut self, window: &DayWindow) -> Result<Vec<BillWithServices>, PortError> {
        let created = bills::bills_created_between(&mut *self.tx, window.start, window.end).await?;
        if created.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = created.iter().map(|b| Uuid::from(b.id)).collect();
        let mut lines_by_bill: HashMap<BillId, Vec<BilledService>> = HashMap::new();
        for line in bills::billed_services_of_bills(&mut *self.tx, &ids).await? {
            lines_by_bill.entry(line.bill_id).or_default().push(line);
        }
        debug!(bills = created.len(), "Loaded bills for day");

        Ok(created
            .into_iter()
            .map(|bill| {
                let services = lines_by_bill.remove(&bill.id).unwrap_or_default();
                BillWithServices { bill, services }
            })
            .collect())
    }

    #[instrument(skip(self, window), fields(date = %window.date))]
    async fn payments_total_in(&mut self, window: &DayWindow) -> Result<Money, PortError> {
        Ok(bills::payments_total_between(&mut *self.tx, window.start, window.end).await?)
    }

    async fn stored_rollup(&mut self) -> Result<Option<DayRollup>, PortError> {
        Ok(PgLedgerStore::load_rollup(&mut *self.tx, self.date).await?)
    }

    #[instrument(skip(self, rollup), fields(date = %self.date))]
    async fn save(&mut self, rollup: &DayRollup) -> Result<DayRollup, PortError> {
        if rollup.daily.date != self.date {
            return Err(PortError::validation(format!(
                "rollup for {} saved under the lock for {}",
                rollup.daily.date, self.date
            )));
        }
        let tx = &mut *self.tx;

        let daily_id = analytics::upsert_daily(&mut *tx, &rollup.daily).await?;

        let service_names: Vec<String> = rollup.services.iter().map(|s| s.service_name.clone()).collect();
        let removed_services = analytics::delete_services_except(&mut *tx, daily_id, &service_names).await?;
        for service in &rollup.services {
            analytics::upsert_service(&mut *tx, daily_id, service).await?;
        }

        let categories: Vec<String> = rollup.categories.iter().map(|c| c.category.clone()).collect();
        let removed_categories = analytics::delete_categories_except(&mut *tx, daily_id, &categories).await?;
        for category in &rollup.categories {
            analytics::upsert_category(&mut *tx, daily_id, category).await?;
        }

        let stored = PgLedgerStore::load_rollup(&mut *tx, self.date)
            .await?
            .ok_or_else(|| DatabaseError::not_found("daily_sales_analytics", self.date))?;

        info!(
            services = stored.services.len(),
            categories = stored.categories.len(),
            removed_services,
            removed_categories,
            "Daily rollup saved"
        );
        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(())
    }
}

/// One open ledger transaction
#[derive(Debug)]
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    #[instrument(skip(self), fields(bill_id = %id))]
    async fn lock_bill(&mut self, id: BillId) -> Result<Option<Bill>, PortError> {
        Ok(bills::find_bill(&mut *self.tx, id, true).await?)
    }

    async fn bill_for_document(&mut self, document_id: DocumentId) -> Result<Option<BillId>, PortError> {
        Ok(bills::bill_for_document(&mut *self.tx, document_id).await?)
    }

    async fn billed_services(&mut self, bill_id: BillId) -> Result<Vec<BilledService>, PortError> {
        Ok(bills::billed_services_of(&mut *self.tx, bill_id).await?)
    }

    async fn find_billed_service(&mut self, id: BilledServiceId) -> Result<Option<BilledService>, PortError> {
        Ok(bills::find_billed_service(&mut *self.tx, id).await?)
    }

    async fn insert_bill(&mut self, bill: &Bill) -> Result<(), PortError> {
        Ok(bills::insert_bill(&mut *self.tx, bill).await?)
    }

    async fn update_bill(&mut self, bill: &Bill) -> Result<(), PortError> {
        Ok(bills::update_bill(&mut *self.tx, bill).await?)
    }

    async fn insert_billed_service(&mut self, line: &BilledService) -> Result<(), PortError> {
        Ok(bills::insert_billed_service(&mut *self.tx, line).await?)
    }

    async fn update_billed_service(&mut self, line: &BilledService) -> Result<(), PortError> {
        Ok(bills::update_billed_service(&mut *self.tx, line).await?)
    }

    async fn delete_billed_service(&mut self, id: BilledServiceId) -> Result<(), PortError> {
        Ok(bills::delete_billed_service(&mut *self.tx, id).await?)
    }

    async fn insert_payment(&mut self, payment: &PaymentHistory) -> Result<(), PortError> {
        Ok(bills::insert_payment(&mut *self.tx, payment).await?)
    }

    async fn insert_audit_log(&mut self, entry: &AuditLogEntry) -> Result<(), PortError> {
        Ok(audit::insert_entry(&mut *self.tx, entry).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(())
    }
}
