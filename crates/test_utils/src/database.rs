//! Database Test Utilities
//!
//! Starts a throwaway PostgreSQL container, applies the ledger migrations,
//! and seeds the master data tables the ledger reads from.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

use core_kernel::{DocumentId, PatientId};
use domain_billing::{CatalogService, DocumentRef};

const POSTGRES_IMAGE: &str = "postgres";
const POSTGRES_TAG: &str = "16-alpine";
const POSTGRES_USER: &str = "test_user";
const POSTGRES_PASSWORD: &str = "test_password";
const POSTGRES_DB: &str = "clinic_test";

/// Tables cleared between tests, children first
const LEDGER_TABLES: &[&str] = &[
    "category_daily_analytics",
    "service_daily_analytics",
    "daily_sales_analytics",
    "bill_audit_logs",
    "billed_service_audit_logs",
    "document_audit_logs",
    "patient_audit_logs",
    "payment_history",
    "billed_services",
    "bills",
    "services",
    "medical_documentations",
];

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connection settings of a test database
#[derive(Debug, Clone)]
pub struct TestDatabaseConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl Default for TestDatabaseConfig {
    fn default() -> Self {
        Self {
            user: POSTGRES_USER.to_string(),
            password: POSTGRES_PASSWORD.to_string(),
            database: POSTGRES_DB.to_string(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

impl TestDatabaseConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// A migrated PostgreSQL container
pub struct TestDatabase {
    _container: ContainerAsync<GenericImage>,
    pub config: TestDatabaseConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Starts a container and applies the ledger migrations
    ///
    /// # Errors
    ///
    /// Returns an error if Docker is unavailable, the container does not
    /// become ready, or a migration fails.
    pub async fn new() -> Result<Self, BoxError> {
        let container = GenericImage::new(POSTGRES_IMAGE, POSTGRES_TAG)
            .with_exposed_port(5432.tcp())
            .with_wait_for(WaitFor::message_on_stderr("database system is ready to accept connections"))
            .with_env_var("POSTGRES_USER", POSTGRES_USER)
            .with_env_var("POSTGRES_PASSWORD", POSTGRES_PASSWORD)
            .with_env_var("POSTGRES_DB", POSTGRES_DB)
            .start()
            .await?;

        let port = container.get_host_port_ipv4(5432).await?;
        let host = container.get_host().await?.to_string();
        let config = TestDatabaseConfig {
            host,
            port,
            ..TestDatabaseConfig::default()
        };

        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.connection_url())
            .await?;

        infra_db::run_migrations(&pool).await?;

        Ok(Self {
            _container: container,
            config,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Empties every ledger and master data table
    pub async fn clear_data(&self) -> Result<(), BoxError> {
        let statement = format!("TRUNCATE TABLE {} CASCADE", LEDGER_TABLES.join(", "));
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts a medical documentation record
    pub async fn seed_document(&self) -> Result<DocumentRef, BoxError> {
        let document = DocumentRef {
            id: DocumentId::new(),
            patient_id: Some(PatientId::new()),
        };
        sqlx::query("INSERT INTO medical_documentations (id, patient_id) VALUES ($1, $2)")
            .bind(Uuid::from(document.id))
            .bind(document.patient_id.map(Uuid::from))
            .execute(&self.pool)
            .await?;
        Ok(document)
    }

    /// Inserts a catalog entry
    pub async fn seed_service(&self, service: &CatalogService) -> Result<(), BoxError> {
        sqlx::query(
            "INSERT INTO services (id, name, category, price, is_active, is_available) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(service.id))
        .bind(&service.name)
        .bind(&service.category)
        .bind(service.price.amount())
        .bind(service.is_active)
        .bind(service.is_available)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

static SHARED_TEST_DB: OnceCell<Arc<TestDatabase>> = OnceCell::const_new();

/// Gets or starts one container shared by every test in the binary
///
/// # Panics
///
/// Panics if the database fails to start.
pub async fn get_shared_test_database() -> Arc<TestDatabase> {
    SHARED_TEST_DB
        .get_or_init(|| async {
            Arc::new(
                TestDatabase::new()
                    .await
                    .expect("Failed to create shared test database"),
            )
        })
        .await
        .clone()
}

/// Starts a container owned by a single test
pub async fn create_isolated_test_database() -> Result<TestDatabase, BoxError> {
    TestDatabase::new().await
}
