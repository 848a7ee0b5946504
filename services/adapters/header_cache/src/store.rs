//! Ordered key-value store backing the header cache
//!
//! The cache needs three things from its store: point reads, ordered
//! range scans over raw byte keys, and batches of puts/deletes that land
//! all together or not at all. [`RedbStore`] provides them on top of a
//! single redb table.

use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::keys::KeyRange;

const HEADERS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("headers");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create store directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] redb::DatabaseError),

    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),

    #[error(transparent)]
    Table(#[from] redb::TableError),

    #[error(transparent)]
    Storage(#[from] redb::StorageError),

    #[error(transparent)]
    Commit(#[from] redb::CommitError),

    /// Injected or backend-specific failure
    #[error("Store operation failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Group of mutations applied in one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Ordered, durable byte-keyed store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Apply every operation of `batch` atomically
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// All entries with `range.start <= key < range.end`, in key order
    fn scan(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    fn count(&self, range: &KeyRange) -> Result<usize, StoreError>;
}

/// redb-backed store, one table of raw byte keys
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open the database at `path`, creating the file and its parent
    /// directory when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let db = Database::create(&path)?;

        // Make sure the table exists so read transactions can open it
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(HEADERS_TABLE)?;
        }
        write_txn.commit()?;

        debug!("Opened header store at {:?}", path);
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEADERS_TABLE)?;
        let value = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        // Dropping an uncommitted transaction aborts it, so an error on
        // any op leaves the table untouched.
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(HEADERS_TABLE)?;
            for op in batch.ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn scan(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        if range.start >= range.end {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEADERS_TABLE)?;

        let mut entries = Vec::new();
        for item in table.range(range.start.as_slice()..range.end.as_slice())? {
            let (key, value) = item?;
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }

    fn count(&self, range: &KeyRange) -> Result<usize, StoreError> {
        if range.start >= range.end {
            return Ok(0);
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEADERS_TABLE)?;

        let mut count = 0;
        for item in table.range(range.start.as_slice()..range.end.as_slice())? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
