//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the clinic ledger, built on SQLx.
//!
//! # Layout
//!
//! - [`pool`]: pool settings, pool creation, embedded migrations
//! - [`repositories`]: SQL, one free function per statement
//! - [`adapters`]: [`PgLedgerStore`] and [`PgMasterData`], the port
//!   implementations the billing service is wired with
//! - [`error`]: SQLSTATE classification and conversion to `PortError`
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PgLedgerStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/clinic")).await?;
//! run_migrations(&pool).await?;
//! let store = PgLedgerStore::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::{PgLedgerStore, PgLedgerTx, PgMasterData, PgRollupTx};
pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
