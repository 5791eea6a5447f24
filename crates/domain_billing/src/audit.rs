//! Append-only audit trail
//!
//! Every tracked mutation of a bill, line item, medical document or patient
//! produces one immutable row in the table for its subject. Rows are never
//! updated; they can only be removed through [`AuditTrailRecorder::delete_one`]
//! or [`AuditTrailRecorder::batch_delete`].
//!
//! # Field diffs
//!
//! [`FieldChanges`] collects before/after values and keeps only the fields
//! that actually differ, so `fields_changed` never lists an unchanged field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use core_kernel::AuditLogId;

use crate::error::BillingError;
use crate::ports::{LedgerStore, LedgerTx};
use crate::principal::Principal;

/// Which audit table an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSubject {
    Bill,
    BilledService,
    Document,
    Patient,
}

impl AuditSubject {
    /// All audit tables, in reporting order
    pub const ALL: [AuditSubject; 4] = [
        AuditSubject::Bill,
        AuditSubject::BilledService,
        AuditSubject::Document,
        AuditSubject::Patient,
    ];

    /// Name of the backing table
    pub fn table_name(&self) -> &'static str {
        match self {
            AuditSubject::Bill => "bill_audit_logs",
            AuditSubject::BilledService => "billed_service_audit_logs",
            AuditSubject::Document => "document_audit_logs",
            AuditSubject::Patient => "patient_audit_logs",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSubject::Bill => "bill",
            AuditSubject::BilledService => "billed_service",
            AuditSubject::Document => "document",
            AuditSubject::Patient => "patient",
        }
    }
}

impl FromStr for AuditSubject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bill" => Ok(AuditSubject::Bill),
            "billed_service" | "billed-service" => Ok(AuditSubject::BilledService),
            "document" => Ok(AuditSubject::Document),
            "patient" => Ok(AuditSubject::Patient),
            other => Err(format!("unknown audit subject '{}'", other)),
        }
    }
}

/// What happened to the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    PaymentRecorded,
    Archived,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
            AuditAction::PaymentRecorded => "payment_recorded",
            AuditAction::Archived => "archived",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AuditAction::Created),
            "updated" => Ok(AuditAction::Updated),
            "deleted" => Ok(AuditAction::Deleted),
            "payment_recorded" => Ok(AuditAction::PaymentRecorded),
            "archived" => Ok(AuditAction::Archived),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

/// One immutable audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditLogId,
    pub subject: AuditSubject,
    pub subject_id: Uuid,
    pub action: AuditAction,
    /// Comma-separated names of the changed fields
    pub fields_changed: String,
    pub previous_data: Option<Value>,
    pub new_data: Option<Value>,
    pub changed_by_name: String,
    pub changed_by_role: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Iterates over the changed field names
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields_changed.split(',').filter(|f| !f.is_empty())
    }
}

/// Before/after values of the fields touched by a mutation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldChanges {
    fields: Vec<String>,
    previous: Map<String, Value>,
    new: Map<String, Value>,
}

impl FieldChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `field` if its value changed
    pub fn track<T: Serialize + PartialEq>(&mut self, field: &str, previous: &T, new: &T) -> bool {
        if previous == new {
            return false;
        }
        self.fields.push(field.to_string());
        self.previous.insert(field.to_string(), to_value(previous));
        self.new.insert(field.to_string(), to_value(new));
        true
    }

    /// Builds changes from two full snapshots, keeping every key in the
    /// snapshots but listing only the keys whose values differ
    pub fn from_snapshots(previous: Value, new: Value) -> Self {
        let previous = into_map(previous);
        let new = into_map(new);
        let fields = new
            .iter()
            .filter(|(k, v)| previous.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        Self { fields, previous, new }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Merges another set of changes into this one
    pub fn extend(&mut self, other: FieldChanges) {
        for field in other.fields {
            if !self.fields.contains(&field) {
                self.fields.push(field);
            }
        }
        self.previous.extend(other.previous);
        self.new.extend(other.new);
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A change about to be written to the audit trail
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub subject: AuditSubject,
    pub subject_id: Uuid,
    pub action: AuditAction,
    pub fields_changed: Vec<String>,
    pub previous_data: Option<Value>,
    pub new_data: Option<Value>,
}

impl AuditRecord {
    /// A creation: no previous data, every snapshot key counts as changed
    pub fn created(subject: AuditSubject, subject_id: impl Into<Uuid>, snapshot: Value) -> Self {
        let fields = snapshot_keys(&snapshot);
        Self {
            subject,
            subject_id: subject_id.into(),
            action: AuditAction::Created,
            fields_changed: fields,
            previous_data: None,
            new_data: Some(snapshot),
        }
    }

    /// A hard deletion of the subject
    pub fn deleted(subject: AuditSubject, subject_id: impl Into<Uuid>, snapshot: Value) -> Self {
        let fields = snapshot_keys(&snapshot);
        Self {
            subject,
            subject_id: subject_id.into(),
            action: AuditAction::Deleted,
            fields_changed: fields,
            previous_data: Some(snapshot),
            new_data: None,
        }
    }

    /// A change described by a field diff
    pub fn changed(
        subject: AuditSubject,
        subject_id: impl Into<Uuid>,
        action: AuditAction,
        changes: FieldChanges,
    ) -> Self {
        Self {
            subject,
            subject_id: subject_id.into(),
            action,
            fields_changed: changes.fields,
            previous_data: Some(Value::Object(changes.previous)),
            new_data: Some(Value::Object(changes.new)),
        }
    }

    /// Turns the record into a row stamped with the acting principal
    pub fn into_entry(self, principal: &Principal, at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditLogId::new_v7(),
            subject: self.subject,
            subject_id: self.subject_id,
            action: self.action,
            fields_changed: self.fields_changed.join(","),
            previous_data: self.previous_data,
            new_data: self.new_data,
            changed_by_name: principal.name.clone(),
            changed_by_role: principal.role.to_string(),
            created_at: at,
        }
    }
}

fn snapshot_keys(snapshot: &Value) -> Vec<String> {
    match snapshot {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Per-table deleted counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionSummary {
    pub bill_audit_logs: u64,
    pub billed_service_audit_logs: u64,
    pub document_audit_logs: u64,
    pub patient_audit_logs: u64,
}

impl DeletionSummary {
    fn set(&mut self, subject: AuditSubject, count: u64) {
        match subject {
            AuditSubject::Bill => self.bill_audit_logs = count,
            AuditSubject::BilledService => self.billed_service_audit_logs = count,
            AuditSubject::Document => self.document_audit_logs = count,
            AuditSubject::Patient => self.patient_audit_logs = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.bill_audit_logs
            + self.billed_service_audit_logs
            + self.document_audit_logs
            + self.patient_audit_logs
    }
}

/// A table whose deletion failed during a batch delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTableFailure {
    pub table: String,
    pub message: String,
}

/// Outcome of a batch delete across every audit table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDeletionSummary {
    pub deleted_count: u64,
    pub deletion_summary: DeletionSummary,
    pub failures: Vec<AuditTableFailure>,
}

impl AuditDeletionSummary {
    /// True when the request was well-formed but no row matched
    pub fn matched_nothing(&self) -> bool {
        self.deleted_count == 0 && self.failures.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Writes and prunes the audit trail
#[derive(Clone)]
pub struct AuditTrailRecorder {
    store: Arc<dyn LedgerStore>,
}

impl AuditTrailRecorder {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Writes one row inside the caller's transaction
    pub async fn record(
        &self,
        tx: &mut dyn LedgerTx,
        record: AuditRecord,
        principal: &Principal,
    ) -> Result<AuditLogEntry, BillingError> {
        let entry = record.into_entry(principal, Utc::now());
        tx.insert_audit_log(&entry).await?;
        debug!(
            subject = entry.subject.as_str(),
            subject_id = %entry.subject_id,
            action = %entry.action,
            fields = %entry.fields_changed,
            "Audit entry recorded"
        );
        Ok(entry)
    }

    /// Writes one row in its own transaction
    ///
    /// Used by collaborators outside the ledger (document and patient
    /// maintenance) that have no transaction of their own to join.
    pub async fn record_now(
        &self,
        record: AuditRecord,
        principal: &Principal,
    ) -> Result<AuditLogEntry, BillingError> {
        let mut tx = self.store.begin().await?;
        let entry = self.record(tx.as_mut(), record, principal).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Lists a subject's history, newest first
    pub async fn history(
        &self,
        subject: AuditSubject,
        subject_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>, BillingError> {
        Ok(self.store.audit_history(subject, subject_id).await?)
    }

    /// Deletes one entry
    #[instrument(skip(self))]
    pub async fn delete_one(
        &self,
        subject: AuditSubject,
        id: AuditLogId,
    ) -> Result<(), BillingError> {
        if !self.store.delete_audit_log(subject, id).await? {
            return Err(BillingError::AuditLogNotFound(id));
        }
        info!(table = subject.table_name(), %id, "Audit entry deleted");
        Ok(())
    }

    /// Deletes the given ids from every audit table
    ///
    /// Tables are processed concurrently and independently: a failure in one
    /// table is reported in the summary and does not stop the others.
    #[instrument(skip(self, ids), fields(id_count = ids.len()))]
    pub async fn batch_delete(
        &self,
        ids: &[AuditLogId],
    ) -> Result<AuditDeletionSummary, BillingError> {
        if ids.is_empty() {
            return Err(BillingError::validation("at least one audit log id is required"));
        }

        let store = &self.store;
        let (bill, billed_service, document, patient) = tokio::join!(
            store.delete_audit_logs(AuditSubject::Bill, ids),
            store.delete_audit_logs(AuditSubject::BilledService, ids),
            store.delete_audit_logs(AuditSubject::Document, ids),
            store.delete_audit_logs(AuditSubject::Patient, ids),
        );

        let mut summary = AuditDeletionSummary::default();
        let results = [
            (AuditSubject::Bill, bill),
            (AuditSubject::BilledService, billed_service),
            (AuditSubject::Document, document),
            (AuditSubject::Patient, patient),
        ];

        for (subject, result) in results {
            match result {
                Ok(count) => summary.deletion_summary.set(subject, count),
                Err(e) => {
                    warn!(table = subject.table_name(), error = %e, "Audit deletion failed for table");
                    summary.failures.push(AuditTableFailure {
                        table: subject.table_name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        summary.deleted_count = summary.deletion_summary.total();

        info!(
            deleted = summary.deleted_count,
            failed_tables = summary.failures.len(),
            "Audit batch delete finished"
        );
        Ok(summary)
    }
}
