//! In-memory storage backend.
//!
//! Thread-safe in-memory implementation of [`ContactStore`]. It is intended
//! for embedded usage, tests, and as a reference implementation. A
//! transaction holds the store mutex until it commits, rolls back, or is
//! dropped, so units of work never interleave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::contact::{Contact, ContactId};
use crate::storage::table::{Clock, ContactTable, SystemClock, TableTransaction};
use crate::storage::traits::{ContactStore, ContactTransaction, StorageError};

/// Thread-safe in-memory contact store.
pub struct InMemoryContactStore {
    table: Mutex<ContactTable>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryContactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that timestamps rows with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(ContactTable::default()),
            clock,
        }
    }

    /// Create a store pre-populated with existing rows.
    ///
    /// Each row must carry an attribute and a link consistent with its
    /// precedence, and ids must be unique. New ids continue after the
    /// highest imported id.
    pub fn from_contacts(contacts: Vec<Contact>) -> Result<Self, StorageError> {
        Ok(Self {
            table: Mutex::new(ContactTable::from_contacts(contacts)?),
            clock: Arc::new(SystemClock),
        })
    }

    /// Locks the table. A transaction that panics undoes its writes while
    /// unwinding, so a poisoned lock still guards committed state.
    fn lock_table(&self) -> MutexGuard<'_, ContactTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All committed contacts, ordered by id.
    pub fn snapshot(&self) -> Result<Vec<Contact>, StorageError> {
        let table = self.lock_table();
        Ok(table.contacts().cloned().collect())
    }
}

impl ContactStore for InMemoryContactStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError> {
        let table = self.lock_table();
        Ok(Box::new(TableTransaction::new(table, self.clock.as_ref(), None)))
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
