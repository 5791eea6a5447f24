//! Billing application service
//!
//! [`BillingService`] wires the engines to one store and exposes the
//! operations the outer layers call. It owns no state beyond the engines.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use core_kernel::{AuditLogId, BillId, ClinicTimezone, DateRange, HealthCheckResult};

use crate::aggregate::{BillAggregate, CreateBillCommand, UpdateBillCommand};
use crate::analytics::{AnalyticsRollupEngine, DailySalesAnalytics, DayRollup, ServiceRevenuePoint};
use crate::audit::{AuditDeletionSummary, AuditLogEntry, AuditRecord, AuditSubject, AuditTrailRecorder};
use crate::bill::{Bill, BillWithServices, PaymentHistory};
use crate::error::BillingError;
use crate::forecast::{Forecast, RevenueTrend};
use crate::pagination::{CursorPaginator, Page, PageRequest, DEFAULT_MAX_LIMIT};
use crate::ports::{BillFilter, LedgerStore, MasterDataPort};
use crate::principal::Principal;
use crate::settlement::{SettlePaymentCommand, SettlementEngine, SettlementOutcome};
use crate::trigger::{AnalyticsTrigger, InlineRollupTrigger, QueuedRollupTrigger};

/// When settlements refresh analytics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsMode {
    /// Replay the day before the settlement call returns
    #[default]
    Inline,
    /// Queue the day for a background worker
    Queued,
}

impl FromStr for AnalyticsMode {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(AnalyticsMode::Inline),
            "queued" => Ok(AnalyticsMode::Queued),
            other => Err(BillingError::validation(format!("unknown analytics mode '{}'", other))),
        }
    }
}

/// Settings for the billing service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingSettings {
    pub timezone: ClinicTimezone,
    pub max_page_limit: u32,
    pub analytics_mode: AnalyticsMode,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            timezone: ClinicTimezone::default(),
            max_page_limit: DEFAULT_MAX_LIMIT,
            analytics_mode: AnalyticsMode::Inline,
        }
    }
}

/// The ledger's operations over one store
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn LedgerStore>,
    bills: BillAggregate,
    settlement: SettlementEngine,
    audit: AuditTrailRecorder,
    analytics: AnalyticsRollupEngine,
}

impl BillingService {
    /// Builds the service
    ///
    /// In queued mode the analytics worker is spawned on the current tokio
    /// runtime and its handle returned.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        master_data: Arc<dyn MasterDataPort>,
        settings: BillingSettings,
    ) -> (Self, Option<JoinHandle<()>>) {
        let analytics = AnalyticsRollupEngine::new(store.clone(), settings.timezone);

        let (trigger, worker): (Arc<dyn AnalyticsTrigger>, _) = match settings.analytics_mode {
            AnalyticsMode::Inline => (Arc::new(InlineRollupTrigger::new(analytics.clone())), None),
            AnalyticsMode::Queued => {
                let (trigger, handle) = QueuedRollupTrigger::spawn(analytics.clone());
                (Arc::new(trigger), Some(handle))
            }
        };

        let service = Self::with_trigger(store, master_data, settings, trigger);
        (service, worker)
    }

    /// Builds the service around a caller-supplied trigger
    pub fn with_trigger(
        store: Arc<dyn LedgerStore>,
        master_data: Arc<dyn MasterDataPort>,
        settings: BillingSettings,
        trigger: Arc<dyn AnalyticsTrigger>,
    ) -> Self {
        Self {
            bills: BillAggregate::new(
                store.clone(),
                master_data,
                CursorPaginator::new(settings.max_page_limit),
            ),
            settlement: SettlementEngine::new(store.clone(), trigger, settings.timezone),
            audit: AuditTrailRecorder::new(store.clone()),
            analytics: AnalyticsRollupEngine::new(store.clone(), settings.timezone),
            store,
        }
    }

    pub fn bills(&self) -> &BillAggregate {
        &self.bills
    }

    pub fn settlement(&self) -> &SettlementEngine {
        &self.settlement
    }

    pub fn audit(&self) -> &AuditTrailRecorder {
        &self.audit
    }

    pub fn analytics(&self) -> &AnalyticsRollupEngine {
        &self.analytics
    }

    // ------------------------------------------------------------------------
    // Bills
    // ------------------------------------------------------------------------

    pub async fn create_bill(
        &self,
        command: CreateBillCommand,
        principal: &Principal,
    ) -> Result<BillWithServices, BillingError> {
        self.bills.create(command, principal).await
    }

    pub async fn update_bill(
        &self,
        bill_id: BillId,
        command: UpdateBillCommand,
        principal: &Principal,
    ) -> Result<BillWithServices, BillingError> {
        self.bills.update(bill_id, command, principal).await
    }

    pub async fn get_bill(&self, bill_id: BillId) -> Result<BillWithServices, BillingError> {
        self.bills.get(bill_id).await
    }

    pub async fn bill_payments(&self, bill_id: BillId) -> Result<Vec<PaymentHistory>, BillingError> {
        self.bills.payments(bill_id).await
    }

    pub async fn list_bills(&self, filter: &BillFilter, request: &PageRequest) -> Result<Page<Bill>, BillingError> {
        self.bills.list(filter, request).await
    }

    pub async fn archive_bill(&self, bill_id: BillId, principal: &Principal) -> Result<Bill, BillingError> {
        self.bills.archive(bill_id, principal).await
    }

    pub async fn settle_payment(
        &self,
        bill_id: BillId,
        command: SettlePaymentCommand,
        principal: &Principal,
    ) -> Result<SettlementOutcome, BillingError> {
        self.settlement.settle(bill_id, command, principal).await
    }

    // ------------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------------

    pub async fn rebuild_daily_analytics(&self, date: NaiveDate) -> Result<DailySalesAnalytics, BillingError> {
        self.analytics.rebuild_day(date).await
    }

    /// Replays every day from `from` to `to`, oldest first
    pub async fn rebuild_analytics_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailySalesAnalytics>, BillingError> {
        let range = DateRange::new(from, to)?;
        self.analytics.rebuild_range(&range).await
    }

    pub async fn daily_analytics(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailySalesAnalytics>, BillingError> {
        self.analytics.daily_range(from, to).await
    }

    pub async fn day_analytics(&self, date: NaiveDate) -> Result<DayRollup, BillingError> {
        self.analytics.day(date).await
    }

    pub async fn service_analytics(
        &self,
        service_name: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ServiceRevenuePoint>, BillingError> {
        self.analytics.service_range(service_name, from, to).await
    }

    pub async fn revenue_trend(&self, from: NaiveDate, to: NaiveDate) -> Result<RevenueTrend, BillingError> {
        self.analytics.revenue_trend(from, to).await
    }

    pub async fn revenue_forecast(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        horizon_days: u32,
    ) -> Result<Forecast, BillingError> {
        self.analytics.revenue_forecast(from, to, horizon_days).await
    }

    pub async fn service_revenue_forecast(
        &self,
        service_name: &str,
        from: NaiveDate,
        to: NaiveDate,
        horizon_days: u32,
    ) -> Result<Forecast, BillingError> {
        self.analytics
            .service_revenue_forecast(service_name, from, to, horizon_days)
            .await
    }

    // ------------------------------------------------------------------------
    // Audit trail
    // ------------------------------------------------------------------------

    /// Records a change made outside the ledger (documents, patients)
    pub async fn record_audit(&self, record: AuditRecord, principal: &Principal) -> Result<AuditLogEntry, BillingError> {
        self.audit.record_now(record, principal).await
    }

    pub async fn audit_history(&self, subject: AuditSubject, subject_id: Uuid) -> Result<Vec<AuditLogEntry>, BillingError> {
        self.audit.history(subject, subject_id).await
    }

    pub async fn delete_audit_logs(&self, ids: &[AuditLogId]) -> Result<AuditDeletionSummary, BillingError> {
        self.audit.batch_delete(ids).await
    }

    pub async fn delete_audit_log(&self, subject: AuditSubject, id: AuditLogId) -> Result<(), BillingError> {
        self.audit.delete_one(subject, id).await
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    pub async fn health(&self) -> HealthCheckResult {
        self.store.health_check().await
    }
}
