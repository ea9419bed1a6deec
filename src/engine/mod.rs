//! Identify engine.
//!
//! [`ContactEngine`] runs one reconciliation per request inside one store
//! transaction and commits it only if every stage succeeded. The engine is
//! synchronous; [`runtime`] puts it behind a bounded worker pool.

/// Bounded worker pool in front of the engine.
pub mod runtime;

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::LinkResult;
use crate::reconcile::{reconcile, Reconciliation};
use crate::request::IdentifyRequest;
use crate::storage::ContactStore;
use crate::view::IdentityView;

/// Identity reconciliation engine.
#[derive(Clone)]
pub struct ContactEngine {
    store: Arc<dyn ContactStore>,
}

impl ContactEngine {
    /// Create a new engine over the given store.
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Reconciles one observation and returns the consolidated identity.
    ///
    /// Repeating a request returns the same view and writes nothing.
    ///
    /// # Errors
    /// - `InvariantViolation` if stored links are corrupt
    /// - `StoreUnavailable` / `TransactionConflict` from the backend
    ///
    /// Every error leaves the store as it was before the call.
    pub fn identify(&self, request: &IdentifyRequest) -> LinkResult<IdentityView> {
        self.identify_detailed(request).map(|r| r.view)
    }

    /// Like [`identify`](Self::identify), also reporting what was written.
    pub fn identify_detailed(&self, request: &IdentifyRequest) -> LinkResult<Reconciliation> {
        debug!(
            email = request.email().is_some(),
            phone_number = request.phone_number().is_some(),
            "identify"
        );

        let mut tx = self.store.begin()?;
        let outcome = match reconcile(tx.as_mut(), request) {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_invariant_violation() {
                    error!(error = %err, "contact links are inconsistent; transaction rolled back");
                }
                tx.rollback()?;
                return Err(err);
            }
        };
        tx.commit()?;

        debug!(
            primary = %outcome.view.primary_contact_id,
            secondaries = outcome.view.secondary_contact_ids.len(),
            created = ?outcome.created,
            "identified contact"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{ContactId, LinkPrecedence, NewContact};
    use crate::storage::InMemoryContactStore;
    use chrono::Utc;

    fn engine() -> (ContactEngine, Arc<InMemoryContactStore>) {
        let store = Arc::new(InMemoryContactStore::new());
        (ContactEngine::new(store.clone()), store)
    }

    #[test]
    fn identify_creates_then_attaches() {
        let (engine, store) = engine();

        let first = engine
            .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
            .unwrap();
        assert_eq!(first.primary_contact_id, ContactId::FIRST);

        let second = engine
            .identify(&IdentifyRequest::pair("a@x.com", "555").unwrap())
            .unwrap();
        assert_eq!(second.primary_contact_id, ContactId::FIRST);
        assert_eq!(second.phone_numbers, vec!["555"]);
        assert_eq!(second.secondary_contact_ids, vec![ContactId::new(2)]);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn failed_reconciliation_leaves_store_unchanged() {
        let now = Utc::now();
        // Secondary pointing at a row that does not exist.
        let orphan = NewContact::secondary(Some("a@x.com".to_string()), None, ContactId::new(40))
            .into_contact(ContactId::new(1), now);
        let store = Arc::new(InMemoryContactStore::from_contacts(vec![orphan.clone()]).unwrap());
        let engine = ContactEngine::new(store.clone());

        let err = engine
            .identify(&IdentifyRequest::pair("a@x.com", "555").unwrap())
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(store.snapshot().unwrap(), vec![orphan]);
    }

    #[test]
    fn detailed_outcome_reports_merge() {
        let (engine, store) = engine();
        engine
            .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
            .unwrap();
        engine
            .identify(&IdentifyRequest::phone_only("555").unwrap())
            .unwrap();

        let outcome = engine
            .identify_detailed(&IdentifyRequest::pair("a@x.com", "555").unwrap())
            .unwrap();
        assert_eq!(outcome.created, None);
        assert_eq!(outcome.demoted, vec![ContactId::new(2)]);
        assert_eq!(
            store.get(ContactId::new(2)).unwrap().unwrap().link_precedence,
            LinkPrecedence::Secondary
        );
    }
}
