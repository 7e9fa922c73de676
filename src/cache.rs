//! Durable ordered key-value cache.
//!
//! Opened once at startup and held for the life of the process. The core
//! never reads or writes it; scheduling state belonging to higher layers
//! lives here, so the contract is simply: open-or-create, sorted lookup,
//! range iteration, and survival across restarts.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, TableDefinition};
use thiserror::Error;
use tracing::info;

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("cache");

/// Errors produced by the durable cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open cache store: {0}")]
    Open(#[from] redb::DatabaseError),

    #[error("cache transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("cache table access failed: {0}")]
    Table(#[from] redb::TableError),

    #[error("cache storage failed: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("cache commit failed: {0}")]
    Commit(#[from] redb::CommitError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Handle to the on-disk ordered store. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    db: Arc<Database>,
}

impl Cache {
    /// Open the store at `path`, creating it (and missing parent
    /// directories) if absent.
    ///
    /// Idempotent with respect to on-disk state: reopening an existing store
    /// preserves its entries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let db = Database::create(path)?;
        // Make sure the table exists so reads on a fresh store succeed.
        let txn = db.begin_write()?;
        txn.open_table(TABLE)?;
        txn.commit()?;

        info!(path = %path.display(), "Opened cache store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Fetch the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    /// Remove `key`, reporting whether it was present.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let present = {
            let mut table = txn.open_table(TABLE)?;
            // Bind here: the removed-value guard must drop before the table.
            let removed = table.remove(key)?.is_some();
            removed
        };
        txn.commit()?;
        Ok(present)
    }

    /// All entries with `from <= key < to`, in key order.
    pub fn range(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        let mut entries = Vec::new();
        for item in table.range(from..to)? {
            let (key, value) = item?;
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }
}
