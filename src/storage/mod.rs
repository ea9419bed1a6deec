//! Storage backends for contactlink.
//!
//! [`ContactStore`] is the transactional boundary the reconciliation core
//! runs against. The in-memory backend is always available; the durable
//! backend lives behind the `persistent` feature.

mod memory;
mod table;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryContactStore;
pub use table::{Clock, ManualClock, Mutation, SystemClock};
pub use traits::{ContactStore, ContactTransaction, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentContactStore};
