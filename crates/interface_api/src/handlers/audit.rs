//! Audit log handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use core_kernel::AuditLogId;
use domain_billing::{AuditLogEntry, AuditSubject, Principal};

use crate::auth::require_admin;
use crate::dto::audit::*;
use crate::error::ApiError;
use crate::AppState;

fn parse_subject(raw: &str) -> Result<AuditSubject, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

/// History of one subject, newest first
pub async fn history(
    State(state): State<AppState>,
    Path((subject, subject_id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    let subject = parse_subject(&subject)?;
    Ok(Json(state.billing.audit_history(subject, subject_id).await?))
}

/// Deletes the given ids from every audit table (admin only)
///
/// A request matching nothing is a 404; a request where some tables failed
/// still succeeds and lists the failures.
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteResponse>, ApiError> {
    require_admin(&principal, "deleting audit logs")?;
    request.validate()?;

    let ids: Vec<AuditLogId> = request.ids.into_iter().map(AuditLogId::from).collect();
    let summary = state.billing.delete_audit_logs(&ids).await?;
    if summary.matched_nothing() {
        return Err(ApiError::NotFound("no audit logs matched the given ids".to_string()));
    }

    Ok(Json(BatchDeleteResponse::from(summary)))
}

/// Deletes one entry (admin only)
pub async fn delete_one(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((subject, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    require_admin(&principal, "deleting audit logs")?;
    let subject = parse_subject(&subject)?;
    state.billing.delete_audit_log(subject, AuditLogId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
