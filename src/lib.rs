pub mod config;
pub mod cries;
pub mod database;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod ledger;

pub use engine::GovernanceEngine;
pub use error::LedgerError;
