//! Durable contact store.
//!
//! Committed state lives in the same indexed table the in-memory backend
//! uses. A transaction's mutation list is appended to the WAL before the
//! table lock is released; if the append fails the transaction is undone in
//! memory, so readers only ever see what the log holds.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::contact::{Contact, ContactId};
use crate::storage::table::{Clock, CommitLog, ContactTable, Mutation, SystemClock, TableTransaction};
use crate::storage::traits::{ContactStore, ContactTransaction, StorageError};

use super::file_lock::DirectoryLock;
use super::wal::WriteAheadLog;
use super::PersistentConfig;

/// File name of the log inside the data directory.
const WAL_FILE: &str = "contacts.wal";

impl CommitLog for WriteAheadLog {
    fn append_commit(&self, mutations: &[Mutation]) -> Result<(), StorageError> {
        self.append(mutations)
            .map(|_| ())
            .map_err(|e| StorageError::BackendError(format!("failed to append WAL entry: {e}")))
    }
}

/// Contact store backed by a write-ahead log.
pub struct PersistentContactStore {
    dir: PathBuf,
    _lock: DirectoryLock,
    wal: WriteAheadLog,
    table: Mutex<ContactTable>,
    clock: Arc<dyn Clock>,
}

impl PersistentContactStore {
    /// Open or create a store in `dir`, replaying its log.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        Self::open_with_clock(dir, config, Arc::new(SystemClock))
    }

    /// Like [`open`](Self::open), timestamping new rows with `clock`.
    pub fn open_with_clock(
        dir: &Path,
        config: PersistentConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::BackendError(format!("failed to create data directory: {e}"))
        })?;

        let lock = DirectoryLock::acquire(dir)
            .map_err(|e| StorageError::BackendError(format!("failed to acquire lock: {e}")))?;

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| StorageError::BackendError(format!("failed to open WAL: {e}")))?;

        let table = Self::replay(&wal)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            table: Mutex::new(table),
            clock,
        })
    }

    fn replay(wal: &WriteAheadLog) -> Result<ContactTable, StorageError> {
        let iter = wal
            .iter()
            .map_err(|e| StorageError::BackendError(format!("failed to iterate WAL: {e}")))?;

        let mut table = ContactTable::default();
        let mut transactions = 0usize;
        let mut mutations = 0usize;
        for entry in iter {
            let entry = entry
                .map_err(|e| StorageError::SerializationError(format!("corrupted WAL entry: {e}")))?;
            for mutation in &entry.mutations {
                table.apply(mutation).map_err(|e| {
                    StorageError::BackendError(format!(
                        "failed to apply WAL entry {}: {e}",
                        entry.sequence
                    ))
                })?;
            }
            transactions += 1;
            mutations += entry.mutations.len();
        }

        if transactions > 0 {
            info!(transactions, mutations, contacts = table.len(), "replayed WAL");
        }
        Ok(table)
    }

    /// Locks the table, recovering from poisoning; see
    /// [`InMemoryContactStore`](crate::storage::InMemoryContactStore).
    fn lock_table(&self) -> MutexGuard<'_, ContactTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directory the store lives in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Size of the log in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal
            .size_bytes()
            .map_err(|e| StorageError::BackendError(format!("failed to stat WAL: {e}")))
    }

    /// Number of committed transactions in the log.
    pub fn committed_transactions(&self) -> Result<u64, StorageError> {
        self.wal
            .current_sequence()
            .map_err(|e| StorageError::BackendError(e.to_string()))
    }
}

impl ContactStore for PersistentContactStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError> {
        let table = self.lock_table();
        Ok(Box::new(TableTransaction::new(
            table,
            self.clock.as_ref(),
            Some(&self.wal as &dyn CommitLog),
        )))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let table = self.lock_table();
        Ok(table.get(id).cloned())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let table = self.lock_table();
        Ok(table.len())
    }
}
