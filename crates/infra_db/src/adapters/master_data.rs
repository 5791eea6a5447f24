//! PostgreSQL master data adapter

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use core_kernel::{DocumentId, DomainPort, PortError, ServiceId};
use domain_billing::{CatalogService, DocumentRef, MasterDataPort};

use crate::repositories::master_data;

/// Reads documents and catalog services from their shared tables
#[derive(Debug, Clone)]
pub struct PgMasterData {
    pool: PgPool,
}

impl PgMasterData {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PgMasterData {}

#[async_trait]
impl MasterDataPort for PgMasterData {
    #[instrument(skip(self), fields(document_id = %id))]
    async fn find_document(&self, id: DocumentId) -> Result<Option<DocumentRef>, PortError> {
        Ok(master_data::find_document(&self.pool, id).await?)
    }

    #[instrument(skip(self), fields(service_id = %id))]
    async fn find_service(&self, id: ServiceId) -> Result<Option<CatalogService>, PortError> {
        Ok(master_data::find_service(&self.pool, id).await?)
    }
}
