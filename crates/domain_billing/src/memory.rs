//! In-memory adapters
//!
//! Used by tests and by the API server when no database is configured.
//! A unit of work takes the store-wide lock and edits a private copy of the
//! state; commit swaps the copy in, drop discards it. Store reads wait while
//! a unit of work is open, so callers must not read through the store while
//! holding a [`LedgerTx`]. A [`RollupTx`] holds the same lock from its
//! first read through commit, which serializes rebuilds of every date.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use core_kernel::{
    AdapterHealth, AuditLogId, BillId, BilledServiceId, DateRange, DayWindow, DocumentId,
    DomainPort, HealthCheckResult, HealthCheckable, Money, PortError, ServiceId,
};

use crate::analytics::{DailySalesAnalytics, DayRollup, ServiceRevenuePoint};
use crate::audit::{AuditLogEntry, AuditSubject};
use crate::bill::{Bill, BillWithServices, BilledService, PaymentHistory};
use crate::pagination::{paginate_slice, Seek};
use crate::ports::{
    BillFilter, CatalogService, DocumentRef, LedgerStore, LedgerTx, MasterDataPort, RollupTx,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    bills: HashMap<BillId, Bill>,
    billed_services: HashMap<BilledServiceId, BilledService>,
    payments: Vec<PaymentHistory>,
    audit_logs: HashMap<AuditSubject, Vec<AuditLogEntry>>,
    rollups: BTreeMap<NaiveDate, DayRollup>,
}

impl LedgerState {
    fn lines_of(&self, bill_id: BillId) -> Vec<BilledService> {
        let mut lines: Vec<BilledService> = self
            .billed_services
            .values()
            .filter(|l| l.bill_id == bill_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| (l.created_at, l.id));
        lines
    }
}

#[derive(Debug, Default)]
struct Faults {
    audit_delete_failures: RwLock<HashSet<AuditSubject>>,
    rollup_reads_fail: AtomicBool,
    rollup_pause: Mutex<Option<RollupPause>>,
}

impl Faults {
    fn check_rollup_reads(&self) -> Result<(), PortError> {
        if self.rollup_reads_fail.load(Ordering::SeqCst) {
            return Err(PortError::connection("analytics source unavailable"));
        }
        Ok(())
    }
}

/// Stalls one rollup rebuild after it has read the day's payments
///
/// Armed with [`InMemoryLedgerStore::pause_next_rollup`]; the rebuild that
/// takes it signals [`RollupPause::reached`] and waits for
/// [`RollupPause::release`].
#[derive(Debug, Clone, Default)]
pub struct RollupPause {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl RollupPause {
    /// Resolves once the paused rebuild has read its inputs
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Lets the paused rebuild continue
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn hold(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

/// In-memory [`LedgerStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    faults: Arc<Faults>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a bill with its lines as-is, bypassing the aggregate
    pub async fn seed_bill(&self, entry: BillWithServices) {
        let mut state = self.state.lock().await;
        for line in entry.services {
            state.billed_services.insert(line.id, line);
        }
        state.bills.insert(entry.bill.id, entry.bill);
    }

    /// Inserts a payment row as-is
    pub async fn seed_payment(&self, payment: PaymentHistory) {
        self.state.lock().await.payments.push(payment);
    }

    /// Every entry of one audit table, oldest first
    pub async fn audit_entries(&self, subject: AuditSubject) -> Vec<AuditLogEntry> {
        self.state
            .lock()
            .await
            .audit_logs
            .get(&subject)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes deletions from one audit table fail
    pub async fn fail_audit_deletes(&self, subject: AuditSubject) {
        self.faults.audit_delete_failures.write().await.insert(subject);
    }

    /// Makes the analytics input reads fail
    pub fn fail_rollups(&self, fail: bool) {
        self.faults.rollup_reads_fail.store(fail, Ordering::SeqCst);
    }

    /// Arms a pause for the next rollup rebuild to read its payments
    pub async fn pause_next_rollup(&self) -> RollupPause {
        let pause = RollupPause::default();
        *self.faults.rollup_pause.lock().await = Some(pause.clone());
        pause
    }
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl HealthCheckable for InMemoryLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult {
            adapter_id: "in-memory-ledger".to_string(),
            status: AdapterHealth::Healthy,
            latency_ms: 0,
            message: Some("In-memory store".to_string()),
            checked_at: Utc::now(),
        }
    }
}

struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn lock_bill(&mut self, id: BillId) -> Result<Option<Bill>, PortError> {
        Ok(self.working.bills.get(&id).cloned())
    }

    async fn bill_for_document(&mut self, document_id: DocumentId) -> Result<Option<BillId>, PortError> {
        Ok(self
            .working
            .bills
            .values()
            .find(|b| b.medical_documentation_id == document_id)
            .map(|b| b.id))
    }

    async fn billed_services(&mut self, bill_id: BillId) -> Result<Vec<BilledService>, PortError> {
        Ok(self.working.lines_of(bill_id))
    }

    async fn find_billed_service(&mut self, id: BilledServiceId) -> Result<Option<BilledService>, PortError> {
        Ok(self.working.billed_services.get(&id).cloned())
    }

    async fn insert_bill(&mut self, bill: &Bill) -> Result<(), PortError> {
        if self
            .working
            .bills
            .values()
            .any(|b| b.medical_documentation_id == bill.medical_documentation_id)
        {
            return Err(PortError::conflict(format!(
                "duplicate key: bills.medical_documentation_id = {}",
                bill.medical_documentation_id
            )));
        }
        self.working.bills.insert(bill.id, bill.clone());
        Ok(())
    }

    async fn update_bill(&mut self, bill: &Bill) -> Result<(), PortError> {
        match self.working.bills.get_mut(&bill.id) {
            Some(stored) => {
                *stored = bill.clone();
                Ok(())
            }
            None => Err(PortError::not_found("Bill", bill.id)),
        }
    }

    async fn insert_billed_service(&mut self, line: &BilledService) -> Result<(), PortError> {
        if !self.working.bills.contains_key(&line.bill_id) {
            return Err(PortError::invalid_reference(format!(
                "billed_services.bill_id references missing bill {}",
                line.bill_id
            )));
        }
        self.working.billed_services.insert(line.id, line.clone());
        Ok(())
    }

    async fn update_billed_service(&mut self, line: &BilledService) -> Result<(), PortError> {
        match self.working.billed_services.get_mut(&line.id) {
            Some(stored) => {
                *stored = line.clone();
                Ok(())
            }
            None => Err(PortError::not_found("BilledService", line.id)),
        }
    }

    async fn delete_billed_service(&mut self, id: BilledServiceId) -> Result<(), PortError> {
        self.working
            .billed_services
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PortError::not_found("BilledService", id))
    }

    async fn insert_payment(&mut self, payment: &PaymentHistory) -> Result<(), PortError> {
        if !self.working.bills.contains_key(&payment.bill_id) {
            return Err(PortError::invalid_reference(format!(
                "payment_history.bill_id references missing bill {}",
                payment.bill_id
            )));
        }
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn insert_audit_log(&mut self, entry: &AuditLogEntry) -> Result<(), PortError> {
        self.working
            .audit_logs
            .entry(entry.subject)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        let InMemoryLedgerTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, PortError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryLedgerTx { guard, working }))
    }

    async fn find_bill(&self, id: BillId) -> Result<Option<Bill>, PortError> {
        Ok(self.state.lock().await.bills.get(&id).cloned())
    }

    async fn billed_services(&self, bill_id: BillId) -> Result<Vec<BilledService>, PortError> {
        Ok(self.state.lock().await.lines_of(bill_id))
    }

    async fn payment_history(&self, bill_id: BillId) -> Result<Vec<PaymentHistory>, PortError> {
        let state = self.state.lock().await;
        let mut payments: Vec<PaymentHistory> = state
            .payments
            .iter()
            .filter(|p| p.bill_id == bill_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        Ok(payments)
    }

    async fn seek_bills(&self, filter: &BillFilter, seek: &Seek) -> Result<Vec<Bill>, PortError> {
        let state = self.state.lock().await;
        let matching: Vec<Bill> = state
            .bills
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        Ok(paginate_slice(&matching, seek))
    }

    async fn begin_rollup(&self, date: NaiveDate) -> Result<Box<dyn RollupTx>, PortError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryRollupTx {
            guard,
            faults: self.faults.clone(),
            date,
            pending: None,
        }))
    }

    async fn day_rollup(&self, date: NaiveDate) -> Result<Option<DayRollup>, PortError> {
        Ok(self.state.lock().await.rollups.get(&date).cloned())
    }

    async fn daily_analytics_range(&self, range: &DateRange) -> Result<Vec<DailySalesAnalytics>, PortError> {
        let state = self.state.lock().await;
        Ok(state
            .rollups
            .range(range.start..=range.end)
            .map(|(_, r)| r.daily.clone())
            .collect())
    }

    async fn service_daily_history(
        &self,
        service_name: &str,
        range: &DateRange,
    ) -> Result<Vec<ServiceRevenuePoint>, PortError> {
        let state = self.state.lock().await;
        Ok(state
            .rollups
            .range(range.start..=range.end)
            .filter_map(|(date, r)| {
                r.services
                    .iter()
                    .find(|s| s.service_name == service_name)
                    .map(|s| ServiceRevenuePoint {
                        date: *date,
                        service_id: s.service_id,
                        service_name: s.service_name.clone(),
                        quantity_sold: s.quantity_sold,
                        total_revenue: s.total_revenue,
                        average_price: s.average_price,
                    })
            })
            .collect())
    }

    async fn audit_history(
        &self,
        subject: AuditSubject,
        subject_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>, PortError> {
        let state = self.state.lock().await;
        let mut entries: Vec<AuditLogEntry> = state
            .audit_logs
            .get(&subject)
            .map(|entries| entries.iter().filter(|e| e.subject_id == subject_id).cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(entries)
    }

    async fn delete_audit_logs(&self, subject: AuditSubject, ids: &[AuditLogId]) -> Result<u64, PortError> {
        if self.faults.audit_delete_failures.read().await.contains(&subject) {
            return Err(PortError::connection(format!("{} unavailable", subject.table_name())));
        }

        let wanted: HashSet<&AuditLogId> = ids.iter().collect();
        let mut state = self.state.lock().await;
        let Some(entries) = state.audit_logs.get_mut(&subject) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|e| !wanted.contains(&e.id));
        Ok((before - entries.len()) as u64)
    }

    async fn delete_audit_log(&self, subject: AuditSubject, id: AuditLogId) -> Result<bool, PortError> {
        Ok(self.delete_audit_logs(subject, &[id]).await? > 0)
    }
}

struct InMemoryRollupTx {
    guard: OwnedMutexGuard<LedgerState>,
    faults: Arc<Faults>,
    date: NaiveDate,
    pending: Option<DayRollup>,
}

#[async_trait]
impl RollupTx for InMemoryRollupTx {
    async fn bills_created_in(&mut self, window: &DayWindow) -> Result<Vec<BillWithServices>, PortError> {
        self.faults.check_rollup_reads()?;
        let state = &*self.guard;
        let mut bills: Vec<BillWithServices> = state
            .bills
            .values()
            .filter(|b| window.contains(b.created_at))
            .map(|b| BillWithServices {
                services: state.lines_of(b.id),
                bill: b.clone(),
            })
            .collect();
        bills.sort_by_key(|b| (b.bill.created_at, b.bill.id));
        Ok(bills)
    }

    async fn payments_total_in(&mut self, window: &DayWindow) -> Result<Money, PortError> {
        self.faults.check_rollup_reads()?;
        let total: Money = self
            .guard
            .payments
            .iter()
            .filter(|p| window.contains(p.created_at))
            .map(|p| p.amount_paid)
            .sum();

        let pause = self.faults.rollup_pause.lock().await.take();
        if let Some(pause) = pause {
            pause.hold().await;
        }
        Ok(total)
    }

    async fn stored_rollup(&mut self) -> Result<Option<DayRollup>, PortError> {
        Ok(self.guard.rollups.get(&self.date).cloned())
    }

    async fn save(&mut self, rollup: &DayRollup) -> Result<DayRollup, PortError> {
        if rollup.daily.date != self.date {
            return Err(PortError::validation(format!(
                "rollup for {} saved under the lock for {}",
                rollup.daily.date, self.date
            )));
        }
        self.pending = Some(rollup.clone());
        Ok(rollup.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        let InMemoryRollupTx { mut guard, date, pending, .. } = *self;
        if let Some(rollup) = pending {
            guard.rollups.insert(date, rollup);
        }
        Ok(())
    }
}

/// In-memory [`MasterDataPort`]
#[derive(Debug, Default)]
pub struct InMemoryMasterData {
    documents: RwLock<HashMap<DocumentId, DocumentRef>>,
    services: RwLock<HashMap<ServiceId, CatalogService>>,
}

impl InMemoryMasterData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_document(&self, document: DocumentRef) {
        self.documents.write().await.insert(document.id, document);
    }

    pub async fn add_service(&self, service: CatalogService) {
        self.services.write().await.insert(service.id, service);
    }

    /// Removes a catalog entry, as if it had been deleted upstream
    pub async fn remove_service(&self, id: ServiceId) {
        self.services.write().await.remove(&id);
    }
}

impl DomainPort for InMemoryMasterData {}

#[async_trait]
impl MasterDataPort for InMemoryMasterData {
    async fn find_document(&self, id: DocumentId) -> Result<Option<DocumentRef>, PortError> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn find_service(&self, id: ServiceId) -> Result<Option<CatalogService>, PortError> {
        Ok(self.services.read().await.get(&id).cloned())
    }
}
