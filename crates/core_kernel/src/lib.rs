//! Core Kernel - Foundational types and utilities for the clinic ledger
//!
//! This crate provides the fundamental building blocks used across the workspace:
//! - Money types with precise decimal arithmetic
//! - Clinic-calendar day windows for daily reporting
//! - Strongly-typed identifiers
//! - Port error types shared by every adapter

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;

pub use money::{Money, MoneyError, Rate, MONEY_SCALE};
pub use temporal::{ClinicTimezone, DayWindow, DateRange, TemporalError};
pub use identifiers::{
    BillId, BilledServiceId, PaymentHistoryId, AuditLogId,
    DocumentId, ServiceId, PatientId,
    DailyAnalyticsId, ServiceAnalyticsId, CategoryAnalyticsId,
};
pub use ports::{PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth};
