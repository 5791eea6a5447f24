//! Billing Domain - Clinic Bill Ledger
//!
//! This crate implements the clinic's billing and payment ledger: bills and
//! their line items, payment settlement, the append-only audit trail, daily
//! sales rollups, and keyset pagination over bill listings.
//!
//! # Payment Status
//!
//! A bill's balance and status are never stored independently; both are
//! derived from the total and the amount paid:
//!
//! - `balance = max(0, total_amount - amount_paid)`
//! - nothing paid → `unpaid`
//! - balance within [`PAID_TOLERANCE`] of zero → `paid`
//! - otherwise → `partially_paid`
//!
//! # Components
//!
//! - [`BillAggregate`]: create, update, read and archive bills
//! - [`SettlementEngine`]: apply payments under a row lock
//! - [`AuditTrailRecorder`]: write and prune the audit tables
//! - [`AnalyticsRollupEngine`]: replay daily rollups, trends and forecasts
//! - [`CursorPaginator`]: `(created_at, id)` keyset pages
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingService, BillingSettings, SettlePaymentCommand};
//!
//! let (billing, _worker) = BillingService::new(store, master_data, BillingSettings::default());
//!
//! let created = billing.create_bill(command, &principal).await?;
//! let outcome = billing
//!     .settle_payment(created.bill.id, SettlePaymentCommand::new(amount, "cash"), &principal)
//!     .await?;
//! ```

pub mod aggregate;
pub mod analytics;
pub mod audit;
pub mod bill;
pub mod error;
pub mod forecast;
pub mod memory;
pub mod pagination;
pub mod ports;
pub mod principal;
pub mod service;
pub mod settlement;
pub mod trigger;

pub use aggregate::{
    BillAggregate, CreateBillCommand, DiscountChange, DiscountRequest, LineItemQuantityChange,
    LineItemRequest, UpdateBillCommand,
};
pub use analytics::{
    AnalyticsRollupEngine, CategoryDailyAnalytics, DailySalesAnalytics, DayFigures, DayRollup,
    ServiceDailyAnalytics, ServiceRevenuePoint, MAX_REBUILD_DAYS,
};
pub use audit::{
    AuditAction, AuditDeletionSummary, AuditLogEntry, AuditRecord, AuditSubject,
    AuditTableFailure, AuditTrailRecorder, DeletionSummary, FieldChanges,
};
pub use bill::{
    Bill, BillTotals, BillWithServices, BilledService, DiscountKind, PaymentHistory,
    PaymentStatus, SeniorPwdDiscount, PAID_TOLERANCE,
};
pub use error::{BillingError, ErrorKind};
pub use forecast::{Forecast, ForecastPoint, RevenuePoint, RevenueTrend, TrendDirection};
pub use memory::{InMemoryLedgerStore, InMemoryMasterData, RollupPause};
pub use pagination::{Cursor, CursorPaginator, Direction, Page, PageRequest};
pub use ports::{
    BillFilter, CatalogService, DocumentRef, LedgerStore, LedgerTx, MasterDataPort, RollupTx,
};
pub use principal::{Principal, Role};
pub use service::{AnalyticsMode, BillingService, BillingSettings};
pub use settlement::{SettlePaymentCommand, SettlementEngine, SettlementOutcome};
pub use trigger::{AnalyticsTrigger, InlineRollupTrigger, QueuedRollupTrigger};
