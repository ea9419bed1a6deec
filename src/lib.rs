//! # contactlink - Transactional Contact Identity Reconciliation
//!
//! contactlink folds observations of `(email, phone number)` pairs into
//! identity clusters. Any two observations that share an email or a phone
//! number belong to the same person; each cluster has exactly one primary
//! contact, and every other member links directly to it.
//!
//! ## Core Concepts
//!
//! - **Contact**: One stored observation, either primary or secondary
//! - **Identity cluster**: A primary plus every secondary linked to it
//! - **Merge**: Two clusters bridged by a new observation; the older primary
//!   survives and the younger one is demoted beneath it
//! - **IdentityView**: The de-duplicated projection of a cluster
//!
//! Every identify call runs matching, merging, linking and aggregation in a
//! single store transaction. Either all of its writes become visible or none
//! do.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use contactlink::{ContactEngine, IdentifyRequest, InMemoryContactStore};
//!
//! let engine = ContactEngine::new(Arc::new(InMemoryContactStore::new()));
//!
//! engine.identify(&IdentifyRequest::pair("lorraine@hill.valley", "123456")?)?;
//! let view = engine.identify(&IdentifyRequest::pair("mcfly@hill.valley", "123456")?)?;
//!
//! assert_eq!(view.emails, vec!["lorraine@hill.valley", "mcfly@hill.valley"]);
//! assert_eq!(view.secondary_contact_ids.len(), 1);
//! # Ok::<(), contactlink::LinkError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod contact;
pub mod error;
pub mod request;
pub mod view;

// Storage, reconciliation, and execution
pub mod engine;
pub mod reconcile;
pub mod storage;

#[cfg(feature = "transport-grpc")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use contact::{Contact, ContactId, LinkPrecedence, NewContact};
pub use engine::runtime::{ContactRuntime, ContactRuntimeConfig, IdentifyHandle};
pub use engine::ContactEngine;
pub use error::{ExecutionError, LinkError, LinkResult, ValidationError};
pub use reconcile::Reconciliation;
pub use request::IdentifyRequest;
pub use storage::{
    Clock, ContactStore, ContactTransaction, InMemoryContactStore, ManualClock, StorageError,
    SystemClock,
};
pub use view::{IdentifyResponse, IdentityView};
