//! Persistent storage backend for contactlink.
//!
//! This module provides durable, crash-safe storage with:
//! - A write-ahead log holding one entry per committed transaction
//! - File locking for single-process access
//! - CRC32 checksums for corruption detection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            PersistentContactStore            │
//! ├──────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │  ContactTable    │  │  WriteAheadLog   │  │
//! │  │  (indexed, RAM)  │  │  (append-only)   │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  │
//! │           └───────────┬─────────┘            │
//! │                       ↓                      │
//! │            ┌─────────────────────┐           │
//! │            │ DirectoryLock(flock)│           │
//! │            └─────────────────────┘           │
//! └──────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::DirectoryLock;
pub use store::PersistentContactStore;
pub use wal::{WalEntry, WalIterator, WriteAheadLog};

use std::path::Path;

use crate::storage::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every commit (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Open or create a persistent contact store at the given path.
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If WAL replay hits a corrupted entry
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use contactlink::storage::open_database;
/// use contactlink::ContactEngine;
///
/// let store = open_database("./contacts.db", None)?;
/// let engine = ContactEngine::new(Arc::new(store));
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentContactStore, StorageError> {
    PersistentContactStore::open(path.as_ref(), config.unwrap_or_default())
}
