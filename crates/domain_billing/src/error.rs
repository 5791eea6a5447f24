//! Billing domain errors

use core_kernel::{AuditLogId, BillId, BilledServiceId, DocumentId, PortError, ServiceId};
use thiserror::Error;

/// Coarse classification callers switch on
///
/// HTTP and other boundaries map kinds to status codes; they never inspect
/// error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    InvalidReference,
    Internal,
}

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Bill not found
    #[error("Bill not found: {0}")]
    BillNotFound(BillId),

    /// Billed service (line item) not found
    #[error("Billed service not found: {0}")]
    BilledServiceNotFound(BilledServiceId),

    /// Source medical document not found
    #[error("Medical documentation not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Catalog service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceId),

    /// Audit log entry not found
    #[error("Audit log not found: {0}")]
    AuditLogNotFound(AuditLogId),

    /// Any other missing entity reported by a store
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Catalog service exists but has been deactivated
    #[error("Service '{name}' ({id}) is deactivated")]
    ServiceDeactivated { id: ServiceId, name: String },

    /// Catalog service exists but is currently unavailable
    #[error("Service '{name}' ({id}) is currently unavailable")]
    ServiceUnavailable { id: ServiceId, name: String },

    /// A bill already exists for the document
    #[error("A bill already exists for medical documentation {0}")]
    DuplicateBill(DocumentId),

    /// Settlement attempted on a fully paid bill
    #[error("Bill {0} is already fully paid")]
    AlreadyPaid(BillId),

    /// Mutation attempted on an archived bill
    #[error("Bill {0} is archived")]
    Archived(BillId),

    /// Other conflicts reported by a store (e.g. unique violations)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A line item referenced in an update belongs to a different bill
    #[error("Billed service {billed_service_id} does not belong to this bill ({bill_id})")]
    ForeignBilledService {
        billed_service_id: BilledServiceId,
        bill_id: BillId,
    },

    /// A pagination cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// A foreign key in storage points nowhere
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Anything unclassified (storage outage, unexpected data)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Creates a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Creates an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        BillingError::Internal(message.into())
    }

    /// Returns the kind used for dispatch at the boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::BillNotFound(_)
            | BillingError::BilledServiceNotFound(_)
            | BillingError::DocumentNotFound(_)
            | BillingError::ServiceNotFound(_)
            | BillingError::AuditLogNotFound(_)
            | BillingError::NotFound { .. } => ErrorKind::NotFound,

            BillingError::DuplicateBill(_)
            | BillingError::AlreadyPaid(_)
            | BillingError::Archived(_)
            | BillingError::Conflict(_) => ErrorKind::Conflict,

            BillingError::ServiceDeactivated { .. }
            | BillingError::ServiceUnavailable { .. }
            | BillingError::Validation(_)
            | BillingError::ForeignBilledService { .. }
            | BillingError::InvalidCursor(_) => ErrorKind::Validation,

            BillingError::InvalidReference(_) => ErrorKind::InvalidReference,

            BillingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this error indicates a missing entity
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<PortError> for BillingError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NotFound { entity_type, id } => BillingError::NotFound {
                entity: entity_type,
                id,
            },
            PortError::Validation { message } => BillingError::Validation(message),
            PortError::Conflict { message } => BillingError::Conflict(message),
            PortError::InvalidReference { message } => BillingError::InvalidReference(message),
            other => BillingError::Internal(other.to_string()),
        }
    }
}

impl From<core_kernel::TemporalError> for BillingError {
    fn from(error: core_kernel::TemporalError) -> Self {
        BillingError::Validation(error.to_string())
    }
}
