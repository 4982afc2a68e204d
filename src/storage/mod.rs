//! Durable storage for the serialized fee ledger.
//!
//! A backend stores one opaque string per key. The ledger keeps its whole
//! record array under a single key and rewrites it on every mutation, so each
//! `save` must replace the value atomically. Nothing here does check-and-set:
//! two processes sharing a backend get last-write-wins.

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::StorageError;

pub use file::FileStorage;
pub use memory::MemoryStorage;

#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Read the value under `key`, `None` if nothing was ever saved
    async fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value under `key`
    async fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
}
