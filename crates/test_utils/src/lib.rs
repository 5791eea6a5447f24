//! Test Utilities Crate
//!
//! Shared test infrastructure for the clinic ledger test suites.
//!
//! # Modules
//!
//! - `fixtures`: fixed principals, amounts, dates and catalog entries
//! - `builders`: bills and payments with fixed timestamps for direct seeding
//! - `database`: PostgreSQL testcontainer with the ledger migrations applied
//! - `assertions`: ledger invariant checks with readable failure messages
//! - `generators`: proptest strategies for amounts, quantities and instants

pub mod assertions;
pub mod builders;
pub mod database;
pub mod fixtures;
pub mod generators;

pub use assertions::*;
pub use builders::*;
pub use database::*;
pub use fixtures::*;
pub use generators::*;
