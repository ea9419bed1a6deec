//! End-to-end identify scenarios against the in-memory store.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use contactlink::{
    Contact, ContactEngine, ContactId, ContactStore, ContactTransaction, IdentifyRequest,
    InMemoryContactStore, LinkPrecedence, ManualClock, NewContact, StorageError,
};

fn engine() -> (ContactEngine, Arc<InMemoryContactStore>) {
    let store = Arc::new(InMemoryContactStore::new());
    (ContactEngine::new(store.clone()), store)
}

fn pair(email: &str, phone: &str) -> IdentifyRequest {
    IdentifyRequest::pair(email, phone).unwrap()
}

fn id(raw: u64) -> ContactId {
    ContactId::new(raw)
}

/// Every secondary links straight to a primary.
fn assert_flat(contacts: &[Contact]) {
    for contact in contacts {
        if let Some(target) = contact.linked_id {
            let parent = contacts.iter().find(|c| c.id == target).unwrap();
            assert!(
                parent.is_primary(),
                "contact {} links to secondary {}",
                contact.id,
                parent.id
            );
        }
        assert!(contact.link_is_consistent());
    }
}

#[test]
fn fresh_observation_creates_a_primary() {
    let (engine, store) = engine();
    let view = engine
        .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
        .unwrap();

    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(view.emails, vec!["a@x.com"]);
    assert!(view.phone_numbers.is_empty());
    assert!(view.secondary_contact_ids.is_empty());

    let rows = store.snapshot().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].link_precedence, LinkPrecedence::Primary);
    assert_eq!(rows[0].phone_number, None);
}

#[test]
fn new_value_attaches_a_secondary() {
    let (engine, store) = engine();
    engine
        .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
        .unwrap();
    let view = engine.identify(&pair("a@x.com", "555")).unwrap();

    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(view.emails, vec!["a@x.com"]);
    assert_eq!(view.phone_numbers, vec!["555"]);
    assert_eq!(view.secondary_contact_ids, vec![id(2)]);

    let secondary = store.get(id(2)).unwrap().unwrap();
    assert_eq!(secondary.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(secondary.linked_id, Some(id(1)));
    assert_eq!(secondary.email.as_deref(), Some("a@x.com"));
    assert_eq!(secondary.phone_number.as_deref(), Some("555"));
}

#[test]
fn known_pair_is_a_no_op() {
    let (engine, store) = engine();
    engine.identify(&pair("a@x.com", "555")).unwrap();
    engine.identify(&pair("b@x.com", "555")).unwrap();
    let before = store.snapshot().unwrap();

    // Each value is already known, although never together.
    let view = engine.identify(&pair("b@x.com", "555")).unwrap();
    let partial = engine
        .identify(&IdentifyRequest::phone_only("555").unwrap())
        .unwrap();

    assert_eq!(view, partial);
    assert_eq!(store.snapshot().unwrap(), before);
}

#[test]
fn repeated_request_is_idempotent() {
    let (engine, store) = engine();
    let requests = [
        pair("doc@hill.valley", "88"),
        IdentifyRequest::email_only("marty@hill.valley").unwrap(),
        pair("marty@hill.valley", "88"),
    ];
    for request in &requests {
        let first = engine.identify(request).unwrap();
        let rows = store.len().unwrap();
        let second = engine.identify(request).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len().unwrap(), rows);
    }
}

#[test]
fn bridging_observation_merges_clusters() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap()));
    let store = Arc::new(InMemoryContactStore::with_clock(clock.clone()));
    let engine = ContactEngine::new(store.clone());

    // P1 (email a) and its secondary.
    engine
        .identify(&IdentifyRequest::email_only("george@hill.valley").unwrap())
        .unwrap();
    clock.advance(Duration::hours(1));
    engine.identify(&pair("george@hill.valley", "919191")).unwrap();

    // P2 (phone b) with two secondaries.
    clock.advance(Duration::hours(1));
    engine
        .identify(&IdentifyRequest::phone_only("717171").unwrap())
        .unwrap();
    clock.advance(Duration::hours(1));
    engine.identify(&pair("biffsucks@hill.valley", "717171")).unwrap();
    clock.advance(Duration::hours(1));
    engine.identify(&pair("biff@hill.valley", "717171")).unwrap();

    clock.advance(Duration::hours(1));
    let view = engine.identify(&pair("george@hill.valley", "717171")).unwrap();

    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(
        view.emails,
        vec!["george@hill.valley", "biffsucks@hill.valley", "biff@hill.valley"]
    );
    assert_eq!(view.phone_numbers, vec!["919191", "717171"]);
    assert_eq!(view.secondary_contact_ids, vec![id(2), id(3), id(4), id(5)]);

    let demoted = store.get(id(3)).unwrap().unwrap();
    assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(demoted.linked_id, Some(id(1)));
    for child in [id(4), id(5)] {
        assert_eq!(store.get(child).unwrap().unwrap().linked_id, Some(id(1)));
    }
    // Both values were already known; the merge inserted nothing.
    assert_eq!(store.len().unwrap(), 5);
    assert_flat(&store.snapshot().unwrap());
}

#[test]
fn equal_created_at_prefers_lower_id() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Arc::new(InMemoryContactStore::with_clock(clock));
    let engine = ContactEngine::new(store.clone());

    engine
        .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
        .unwrap();
    engine
        .identify(&IdentifyRequest::phone_only("555").unwrap())
        .unwrap();
    let view = engine.identify(&pair("a@x.com", "555")).unwrap();

    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(store.get(id(2)).unwrap().unwrap().linked_id, Some(id(1)));
}

#[test]
fn older_primary_wins_even_with_higher_id() {
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let now = start + Duration::days(30);
    let young = NewContact::primary(Some("a@x.com".to_string()), None).into_contact(id(1), now);
    let old = NewContact::primary(None, Some("555".to_string())).into_contact(id(2), start);
    let store = Arc::new(InMemoryContactStore::from_contacts(vec![young, old]).unwrap());
    let engine = ContactEngine::new(store.clone());

    let view = engine.identify(&pair("a@x.com", "555")).unwrap();
    assert_eq!(view.primary_contact_id, id(2));
    assert_eq!(view.emails, vec!["a@x.com"]);
    assert_eq!(view.phone_numbers, vec!["555"]);
    assert_eq!(view.secondary_contact_ids, vec![id(1)]);
}

#[test]
fn aggregation_orders_and_dedups_values() {
    let (engine, _store) = engine();
    engine.identify(&pair("a@x.com", "1")).unwrap();
    engine.identify(&pair("b@x.com", "1")).unwrap();
    engine.identify(&pair("a@x.com", "2")).unwrap();
    let view = engine.identify(&pair("b@x.com", "3")).unwrap();

    assert_eq!(view.emails, vec!["a@x.com", "b@x.com"]);
    assert_eq!(view.phone_numbers, vec!["1", "2", "3"]);
    assert_eq!(view.secondary_contact_ids, vec![id(2), id(3), id(4)]);
}

#[test]
fn chain_of_merges_stays_flat() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Arc::new(InMemoryContactStore::with_clock(clock.clone()));
    let engine = ContactEngine::new(store.clone());

    // Five independent identities, each with a secondary.
    for n in 0..5 {
        clock.advance(Duration::minutes(1));
        engine
            .identify(&IdentifyRequest::email_only(format!("p{n}@x.com")).unwrap())
            .unwrap();
        clock.advance(Duration::minutes(1));
        engine.identify(&pair(&format!("p{n}@x.com"), &format!("{n}00"))).unwrap();
    }

    // Bridge them newest-first so each merge demotes an already-merged root.
    for n in (0..4).rev() {
        clock.advance(Duration::minutes(1));
        engine
            .identify(&pair(&format!("p{n}@x.com"), &format!("{}00", n + 1)))
            .unwrap();
    }

    let rows = store.snapshot().unwrap();
    assert_flat(&rows);
    let primaries: Vec<&Contact> = rows.iter().filter(|c| c.is_primary()).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].id, id(1));

    let view = engine
        .identify(&IdentifyRequest::phone_only("400").unwrap())
        .unwrap();
    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(view.cluster_size(), rows.len());
}

#[test]
fn match_through_secondary_resolves_to_its_primary() {
    let (engine, store) = engine();
    engine
        .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
        .unwrap();
    engine.identify(&pair("a@x.com", "555")).unwrap();

    // Only the secondary carries 555.
    let view = engine
        .identify(&IdentifyRequest::phone_only("555").unwrap())
        .unwrap();
    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(view.secondary_contact_ids, vec![id(2)]);

    // A new email next to 555 joins the same cluster.
    let view = engine.identify(&pair("c@x.com", "555")).unwrap();
    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(store.get(id(3)).unwrap().unwrap().linked_id, Some(id(1)));
    assert_flat(&store.snapshot().unwrap());
}

#[test]
fn clusters_bridged_through_a_secondary_merge() {
    let (engine, store) = engine();
    engine
        .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
        .unwrap();
    engine.identify(&pair("a@x.com", "555")).unwrap();
    engine
        .identify(&IdentifyRequest::email_only("b@x.com").unwrap())
        .unwrap();

    let view = engine.identify(&pair("b@x.com", "555")).unwrap();
    assert_eq!(view.primary_contact_id, id(1));
    assert_eq!(view.emails, vec!["a@x.com", "b@x.com"]);
    assert_eq!(view.secondary_contact_ids, vec![id(2), id(3)]);
    assert_eq!(
        store.get(id(3)).unwrap().unwrap().link_precedence,
        LinkPrecedence::Secondary
    );
}

#[test]
fn invalid_request_never_reaches_the_store() {
    assert!(IdentifyRequest::new(None, None).unwrap_err().to_string().contains("phoneNumber"));
    assert!(IdentifyRequest::new(Some(String::new()), Some("   ".to_string())).is_err());

    let long = "x".repeat(400);
    assert!(IdentifyRequest::email_only(long).is_err());
}

#[test]
fn corrupt_links_fail_without_writing() {
    let now = Utc::now();
    let p = NewContact::primary(Some("a@x.com".to_string()), None).into_contact(id(1), now);
    let s = NewContact::secondary(Some("b@x.com".to_string()), None, id(1)).into_contact(id(2), now);
    // Links to a secondary.
    let bad = NewContact::secondary(None, Some("555".to_string()), id(2)).into_contact(id(3), now);
    let rows = vec![p, s, bad];
    let store = Arc::new(InMemoryContactStore::from_contacts(rows.clone()).unwrap());
    let engine = ContactEngine::new(store.clone());

    let err = engine.identify(&pair("c@x.com", "555")).unwrap_err();
    assert!(err.is_invariant_violation());
    assert!(!err.is_retryable());
    assert_eq!(store.snapshot().unwrap(), rows);

    // The store keeps serving unrelated requests.
    let view = engine
        .identify(&IdentifyRequest::email_only("z@x.com").unwrap())
        .unwrap();
    assert_eq!(view.primary_contact_id, id(4));
}

/// Store whose transactions fail at the final cluster read, after every
/// write of the request has been staged.
struct FailingAggregateStore {
    inner: InMemoryContactStore,
}

struct FailingAggregateTx<'a> {
    inner: Box<dyn ContactTransaction + 'a>,
}

impl ContactStore for FailingAggregateStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError> {
        Ok(Box::new(FailingAggregateTx {
            inner: self.inner.begin()?,
        }))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        self.inner.get(id)
    }

    fn len(&self) -> Result<usize, StorageError> {
        self.inner.len()
    }
}

impl ContactTransaction for FailingAggregateTx<'_> {
    fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        self.inner.find_by_email_or_phone(email, phone_number)
    }

    fn get(&mut self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        self.inner.get(id)
    }

    fn insert(&mut self, contact: NewContact) -> Result<Contact, StorageError> {
        self.inner.insert(contact)
    }

    fn update_precedence_and_link(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<Contact, StorageError> {
        self.inner.update_precedence_and_link(id, precedence, linked_id)
    }

    fn reparent_children(
        &mut self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<usize, StorageError> {
        self.inner.reparent_children(old_linked_id, new_linked_id)
    }

    fn find_cluster(&mut self, _primary_id: ContactId) -> Result<Vec<Contact>, StorageError> {
        Err(StorageError::BackendError("cluster read failed".to_string()))
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.inner.rollback()
    }
}

#[test]
fn error_after_merge_rolls_back_every_write() {
    let now = Utc::now();
    let rows = vec![
        NewContact::primary(Some("a@x.com".to_string()), None).into_contact(id(1), now),
        NewContact::primary(None, Some("555".to_string())).into_contact(id(2), now),
        NewContact::secondary(Some("b@x.com".to_string()), Some("555".to_string()), id(2))
            .into_contact(id(3), now),
    ];
    let store = Arc::new(FailingAggregateStore {
        inner: InMemoryContactStore::from_contacts(rows.clone()).unwrap(),
    });
    let engine = ContactEngine::new(store.clone());

    // Demotes 2 and re-parents 3 before failing.
    let err = engine.identify(&pair("a@x.com", "555")).unwrap_err();
    assert!(err.is_retryable());

    // Inserts a secondary before failing.
    let err = engine.identify(&pair("c@x.com", "555")).unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(store.inner.snapshot().unwrap(), rows);
}
