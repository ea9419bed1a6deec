//! Abstract storage traits for contactlink.
//!
//! These traits define the contract that storage backends must implement.
//! All reconciliation work happens through a [`ContactTransaction`]: a
//! scoped handle that sees a serializable view of the store, stages writes,
//! and rolls every staged write back unless `commit` succeeds.

use thiserror::Error;

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// Insert carried neither email nor phone number.
    #[error("Contact must carry an email or a phone number")]
    MissingAttributes,

    /// A write would break the primary/secondary link invariants.
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Concurrent writers collided; the unit of work may be retried.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Transactional contact store.
///
/// # Isolation
/// `begin` must return a handle whose reads and writes are serializable
/// with respect to every other transaction on the same store. Backends that
/// cannot guarantee this must report collisions as [`StorageError::Conflict`]
/// so the caller can retry the whole unit of work.
pub trait ContactStore: Send + Sync {
    /// Opens a unit of work.
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError>;

    /// Reads one committed contact outside any transaction.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Number of committed contacts.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true if no contact has been committed.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// A scoped unit of work against a [`ContactStore`].
///
/// Dropping the handle without calling `commit` discards every staged write.
pub trait ContactTransaction {
    /// All contacts whose email equals `email` or whose phone number equals
    /// `phone_number`, ordered by `created_at` then id. A `None` argument
    /// contributes no clause.
    fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError>;

    /// Reads one contact by id.
    fn get(&mut self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Inserts a contact and returns it with its assigned id and timestamps.
    ///
    /// # Errors
    /// - `MissingAttributes` if both values are `None`
    /// - `InvalidLink` if a secondary does not point at an existing primary,
    ///   or a primary carries a link
    fn insert(&mut self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Rewrites precedence and link of an existing contact.
    ///
    /// # Errors
    /// - `ContactNotFound` if `id` does not exist
    /// - `InvalidLink` if the target is not a primary, the contact would
    ///   link to itself, or a secondary would be promoted back to primary
    fn update_precedence_and_link(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<Contact, StorageError>;

    /// Points every contact linked to `old_linked_id` at `new_linked_id`.
    /// Returns the number of contacts rewritten.
    fn reparent_children(
        &mut self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<usize, StorageError>;

    /// The contact `primary_id` plus every contact linked to it, ordered by id.
    fn find_cluster(&mut self, primary_id: ContactId) -> Result<Vec<Contact>, StorageError>;

    /// Makes every staged write durable and visible.
    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discards every staged write.
    fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
