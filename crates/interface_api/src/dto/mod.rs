//! Request and response bodies

pub mod analytics;
pub mod audit;
pub mod bills;
