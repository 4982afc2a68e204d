//! Student fee ledger: durable fee records, per-student totals mirrored onto
//! the school backend, retries and reconciliation, and a terminal front end.

pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod storage;
pub mod telemetry;
pub mod ui;

pub use error::{ApiError, LedgerError, StorageError};
pub use ledger::{LedgerOptions, LedgerStore};
