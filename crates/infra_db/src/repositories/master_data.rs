//! Reads of master data owned by other parts of the clinic system

use rust_decimal::Decimal;
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

use core_kernel::{DocumentId, Money, PatientId, ServiceId};
use domain_billing::{CatalogService, DocumentRef};

use crate::error::DatabaseError;

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
}

impl From<DocumentRow> for DocumentRef {
    fn from(row: DocumentRow) -> Self {
        DocumentRef {
            id: DocumentId::from(row.id),
            patient_id: row.patient_id.map(PatientId::from),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ServiceRow {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub price: Decimal,
    pub is_active: bool,
    pub is_available: bool,
}

impl From<ServiceRow> for CatalogService {
    fn from(row: ServiceRow) -> Self {
        CatalogService {
            id: ServiceId::from(row.id),
            name: row.name,
            category: row.category,
            price: Money::new(row.price),
            is_active: row.is_active,
            is_available: row.is_available,
        }
    }
}

pub async fn find_document<'e>(
    db: impl PgExecutor<'e>,
    id: DocumentId,
) -> Result<Option<DocumentRef>, DatabaseError> {
    let row = sqlx::query_as::<_, DocumentRow>(
        "SELECT id, patient_id FROM medical_documentations WHERE id = $1",
    )
    .bind(Uuid::from(id))
    .fetch_optional(db)
    .await?;
    Ok(row.map(DocumentRef::from))
}

pub async fn find_service<'e>(
    db: impl PgExecutor<'e>,
    id: ServiceId,
) -> Result<Option<CatalogService>, DatabaseError> {
    let row = sqlx::query_as::<_, ServiceRow>(
        "SELECT id, name, category, price, is_active, is_available FROM services WHERE id = $1",
    )
    .bind(Uuid::from(id))
    .fetch_optional(db)
    .await?;
    Ok(row.map(CatalogService::from))
}
