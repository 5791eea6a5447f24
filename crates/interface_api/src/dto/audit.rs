//! Audit log DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use domain_billing::AuditDeletionSummary;

#[derive(Debug, Deserialize, Validate)]
pub struct BatchDeleteRequest {
    #[validate(length(min = 1, message = "at least one audit log id is required"))]
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: AuditDeletionSummary,
}

impl From<AuditDeletionSummary> for BatchDeleteResponse {
    fn from(summary: AuditDeletionSummary) -> Self {
        let message = if summary.is_partial() {
            format!(
                "Deleted {} audit log(s); {} table(s) failed",
                summary.deleted_count,
                summary.failures.len()
            )
        } else {
            format!("Deleted {} audit log(s)", summary.deleted_count)
        };
        Self { message, summary }
    }
}
