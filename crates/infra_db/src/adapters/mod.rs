//! PostgreSQL adapters for the billing ports
//!
//! ```rust,ignore
//! use infra_db::adapters::{PgLedgerStore, PgMasterData};
//!
//! let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
//! let master: Arc<dyn MasterDataPort> = Arc::new(PgMasterData::new(pool));
//! ```

pub mod ledger;
pub mod master_data;

pub use ledger::{PgLedgerStore, PgLedgerTx, PgRollupTx};
pub use master_data::PgMasterData;
