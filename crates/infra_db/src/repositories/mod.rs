//! SQL for the ledger tables
//!
//! Every query is a free function generic over [`sqlx::postgres::PgExecutor`],
//! so the same statement runs against the pool for plain reads and against an
//! open transaction inside a unit of work. Rows are mapped to domain types at
//! this layer; nothing above it sees a `*Row` struct.

pub mod analytics;
pub mod audit;
pub mod bills;
pub mod master_data;
