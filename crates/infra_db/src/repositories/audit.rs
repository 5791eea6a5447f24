//! Audit table queries
//!
//! The four audit tables share one shape, so every query is written once and
//! pointed at a table by [`AuditSubject::table_name`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use core_kernel::AuditLogId;
use domain_billing::{AuditAction, AuditLogEntry, AuditSubject};

use crate::error::DatabaseError;

const AUDIT_COLUMNS: &str = "id, subject_id, action, fields_changed, previous_data, new_data, \
    changed_by_name, changed_by_role, created_at";

/// Database row shared by the audit tables
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub action: String,
    pub fields_changed: String,
    pub previous_data: Option<Value>,
    pub new_data: Option<Value>,
    pub changed_by_name: String,
    pub changed_by_role: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogRow {
    pub fn into_entry(self, subject: AuditSubject) -> Result<AuditLogEntry, DatabaseError> {
        Ok(AuditLogEntry {
            id: AuditLogId::from(self.id),
            subject,
            subject_id: self.subject_id,
            action: AuditAction::from_str(&self.action).map_err(DatabaseError::SerializationError)?,
            fields_changed: self.fields_changed,
            previous_data: self.previous_data,
            new_data: self.new_data,
            changed_by_name: self.changed_by_name,
            changed_by_role: self.changed_by_role,
            created_at: self.created_at,
        })
    }
}

pub async fn insert_entry<'e>(db: impl PgExecutor<'e>, entry: &AuditLogEntry) -> Result<(), DatabaseError> {
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        entry.subject.table_name(),
        AUDIT_COLUMNS
    );
    sqlx::query(&sql)
        .bind(Uuid::from(entry.id))
        .bind(entry.subject_id)
        .bind(entry.action.as_str())
        .bind(&entry.fields_changed)
        .bind(&entry.previous_data)
        .bind(&entry.new_data)
        .bind(&entry.changed_by_name)
        .bind(&entry.changed_by_role)
        .bind(entry.created_at)
        .execute(db)
        .await?;
    Ok(())
}

/// One subject's entries, newest first
pub async fn history<'e>(
    db: impl PgExecutor<'e>,
    subject: AuditSubject,
    subject_id: Uuid,
) -> Result<Vec<AuditLogEntry>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE subject_id = $1 ORDER BY created_at DESC, id DESC",
        AUDIT_COLUMNS,
        subject.table_name()
    );
    sqlx::query_as::<_, AuditLogRow>(&sql)
        .bind(subject_id)
        .fetch_all(db)
        .await?
        .into_iter()
        .map(|row| row.into_entry(subject))
        .collect()
}

/// Deletes matching ids from one table, returning the number removed
pub async fn delete_entries<'e>(
    db: impl PgExecutor<'e>,
    subject: AuditSubject,
    ids: &[AuditLogId],
) -> Result<u64, DatabaseError> {
    let ids: Vec<Uuid> = ids.iter().map(|id| Uuid::from(*id)).collect();
    let sql = format!("DELETE FROM {} WHERE id = ANY($1)", subject.table_name());
    let result = sqlx::query(&sql).bind(&ids).execute(db).await?;
    Ok(result.rows_affected())
}
