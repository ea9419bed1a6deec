//! Indexed contact table and the journaled transaction over it.
//!
//! Both backends keep the committed state in a [`ContactTable`] behind one
//! mutex. A transaction holds that mutex for its whole lifetime, which makes
//! every unit of work serializable. Writes are applied in place and recorded
//! twice: as [`Mutation`]s (what a commit log persists) and as undo steps
//! (what a rollback or a drop replays in reverse).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::storage::traits::{ContactTransaction, StorageError};

/// Source of `created_at` / `updated_at` timestamps.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Useful to produce identical
/// `created_at` values.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts the clock at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Sets the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One committed change, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// A new row.
    Insert(Contact),
    /// Demotion or re-parenting of an existing row.
    Relink {
        /// Row being rewritten.
        id: ContactId,
        /// New precedence.
        link_precedence: LinkPrecedence,
        /// New link target.
        linked_id: Option<ContactId>,
        /// Time of the rewrite.
        updated_at: DateTime<Utc>,
    },
}

/// Receives the mutation list of a transaction before it becomes visible.
pub(crate) trait CommitLog: Send + Sync {
    fn append_commit(&self, mutations: &[Mutation]) -> Result<(), StorageError>;
}

#[derive(Debug)]
pub(crate) struct ContactTable {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    children: HashMap<ContactId, BTreeSet<ContactId>>,
    next_id: ContactId,
}

impl Default for ContactTable {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_email: HashMap::new(),
            by_phone: HashMap::new(),
            children: HashMap::new(),
            next_id: ContactId::FIRST,
        }
    }
}

fn validate_row(contact: &Contact) -> Result<(), StorageError> {
    if contact.email.is_none() && contact.phone_number.is_none() {
        return Err(StorageError::MissingAttributes);
    }
    if !contact.link_is_consistent() {
        return Err(StorageError::InvalidLink(format!(
            "contact {} is {} with linked_id {:?}",
            contact.id, contact.link_precedence, contact.linked_id
        )));
    }
    Ok(())
}

/// Id allocated after `id`; fails once the id space is used up.
fn successor(id: ContactId) -> Result<ContactId, StorageError> {
    id.checked_next()
        .ok_or_else(|| StorageError::BackendError(format!("contact id {id} has no successor")))
}

impl ContactTable {
    /// Builds a table from existing rows.
    ///
    /// Rows are checked one by one (attributes present, precedence and link
    /// agree, ids unique). Link targets are taken as-is; reconciliation
    /// reports inconsistent links when it meets them.
    pub(crate) fn from_contacts(contacts: Vec<Contact>) -> Result<Self, StorageError> {
        let mut table = Self::default();
        for contact in contacts {
            validate_row(&contact)?;
            if table.by_id.contains_key(&contact.id) {
                return Err(StorageError::BackendError(format!(
                    "duplicate contact id {}",
                    contact.id
                )));
            }
            table.next_id = table.next_id.max(successor(contact.id)?);
            table.insert_row(contact);
        }
        Ok(table)
    }

    pub(crate) fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.by_id.values()
    }

    fn matching(&self, email: Option<&str>, phone_number: Option<&str>) -> Vec<Contact> {
        let mut ids = BTreeSet::new();
        if let Some(hits) = email.and_then(|e| self.by_email.get(e)) {
            ids.extend(hits.iter().copied());
        }
        if let Some(hits) = phone_number.and_then(|p| self.by_phone.get(p)) {
            ids.extend(hits.iter().copied());
        }

        let mut out: Vec<Contact> = ids
            .into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect();
        out.sort_by_key(Contact::seniority);
        out
    }

    fn cluster(&self, primary_id: ContactId) -> Vec<Contact> {
        let mut ids: BTreeSet<ContactId> = self
            .children
            .get(&primary_id)
            .cloned()
            .unwrap_or_default();
        ids.insert(primary_id);
        ids.into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect()
    }

    fn children_of(&self, id: ContactId) -> Vec<ContactId> {
        self.children
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn insert_row(&mut self, contact: Contact) {
        if let Some(email) = &contact.email {
            self.by_email.entry(email.clone()).or_default().insert(contact.id);
        }
        if let Some(phone) = &contact.phone_number {
            self.by_phone.entry(phone.clone()).or_default().insert(contact.id);
        }
        if let Some(parent) = contact.linked_id {
            self.children.entry(parent).or_default().insert(contact.id);
        }
        self.by_id.insert(contact.id, contact);
    }

    fn remove_row(&mut self, id: ContactId) {
        let Some(contact) = self.by_id.remove(&id) else {
            return;
        };
        if let Some(email) = &contact.email {
            remove_from_index(&mut self.by_email, email, id);
        }
        if let Some(phone) = &contact.phone_number {
            remove_from_index(&mut self.by_phone, phone, id);
        }
        if let Some(parent) = contact.linked_id {
            remove_from_index(&mut self.children, &parent, id);
        }
    }

    /// Swaps in a new version of an existing row. Email and phone are
    /// immutable, so only the link index moves.
    fn replace_row(&mut self, contact: Contact) {
        let previous_link = self.by_id.get(&contact.id).and_then(|c| c.linked_id);
        if previous_link != contact.linked_id {
            if let Some(parent) = previous_link {
                remove_from_index(&mut self.children, &parent, contact.id);
            }
            if let Some(parent) = contact.linked_id {
                self.children.entry(parent).or_default().insert(contact.id);
            }
        }
        self.by_id.insert(contact.id, contact);
    }

    /// Re-applies a logged mutation (WAL replay).
    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn apply(&mut self, mutation: &Mutation) -> Result<(), StorageError> {
        match mutation {
            Mutation::Insert(contact) => {
                validate_row(contact)?;
                if self.by_id.contains_key(&contact.id) {
                    return Err(StorageError::BackendError(format!(
                        "replayed insert of existing contact {}",
                        contact.id
                    )));
                }
                self.next_id = self.next_id.max(successor(contact.id)?);
                self.insert_row(contact.clone());
            }
            Mutation::Relink {
                id,
                link_precedence,
                linked_id,
                updated_at,
            } => {
                let current = self
                    .by_id
                    .get(id)
                    .cloned()
                    .ok_or(StorageError::ContactNotFound(*id))?;
                let updated = Contact {
                    link_precedence: *link_precedence,
                    linked_id: *linked_id,
                    updated_at: *updated_at,
                    ..current
                };
                validate_row(&updated)?;
                self.replace_row(updated);
            }
        }
        Ok(())
    }
}

fn remove_from_index<K>(index: &mut HashMap<K, BTreeSet<ContactId>>, key: &K, id: ContactId)
where
    K: std::hash::Hash + Eq,
{
    if let Some(set) = index.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

enum Undo {
    Remove(ContactId),
    Restore(Contact),
}

/// Transaction over a locked [`ContactTable`].
pub(crate) struct TableTransaction<'a> {
    table: MutexGuard<'a, ContactTable>,
    clock: &'a dyn Clock,
    log: Option<&'a dyn CommitLog>,
    journal: Vec<Mutation>,
    undo: Vec<Undo>,
    next_id_at_begin: ContactId,
    finished: bool,
}

impl<'a> TableTransaction<'a> {
    pub(crate) fn new(
        table: MutexGuard<'a, ContactTable>,
        clock: &'a dyn Clock,
        log: Option<&'a dyn CommitLog>,
    ) -> Self {
        let next_id_at_begin = table.next_id;
        Self {
            table,
            clock,
            log,
            journal: Vec::new(),
            undo: Vec::new(),
            next_id_at_begin,
            finished: false,
        }
    }

    fn require_primary(&self, target: ContactId) -> Result<(), StorageError> {
        match self.table.get(target) {
            None => Err(StorageError::InvalidLink(format!(
                "link target {target} does not exist"
            ))),
            Some(contact) if !contact.is_primary() => Err(StorageError::InvalidLink(format!(
                "link target {target} is a secondary"
            ))),
            Some(_) => Ok(()),
        }
    }

    fn undo_all(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Remove(id) => self.table.remove_row(id),
                Undo::Restore(contact) => self.table.replace_row(contact),
            }
        }
        self.table.next_id = self.next_id_at_begin;
        self.journal.clear();
    }
}

impl ContactTransaction for TableTransaction<'_> {
    fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        Ok(self.table.matching(email, phone_number))
    }

    fn get(&mut self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        Ok(self.table.get(id).cloned())
    }

    fn insert(&mut self, contact: NewContact) -> Result<Contact, StorageError> {
        if contact.email.is_none() && contact.phone_number.is_none() {
            return Err(StorageError::MissingAttributes);
        }
        match (contact.link_precedence, contact.linked_id) {
            (LinkPrecedence::Primary, None) => {}
            (LinkPrecedence::Primary, Some(_)) => {
                return Err(StorageError::InvalidLink(
                    "primary contact cannot carry a link".to_string(),
                ));
            }
            (LinkPrecedence::Secondary, None) => {
                return Err(StorageError::InvalidLink(
                    "secondary contact requires a link".to_string(),
                ));
            }
            (LinkPrecedence::Secondary, Some(target)) => self.require_primary(target)?,
        }

        let id = self.table.next_id;
        let next_id = successor(id)?;
        let row = contact.into_contact(id, self.clock.now());
        self.table.next_id = next_id;
        self.table.insert_row(row.clone());
        self.undo.push(Undo::Remove(id));
        self.journal.push(Mutation::Insert(row.clone()));
        Ok(row)
    }

    fn update_precedence_and_link(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<Contact, StorageError> {
        let current = self
            .table
            .get(id)
            .cloned()
            .ok_or(StorageError::ContactNotFound(id))?;

        match (precedence, linked_id) {
            (LinkPrecedence::Primary, Some(_)) => {
                return Err(StorageError::InvalidLink(
                    "primary contact cannot carry a link".to_string(),
                ));
            }
            (LinkPrecedence::Primary, None) if current.is_secondary() => {
                return Err(StorageError::InvalidLink(format!(
                    "contact {id} cannot be promoted back to primary"
                )));
            }
            (LinkPrecedence::Primary, None) => {}
            (LinkPrecedence::Secondary, None) => {
                return Err(StorageError::InvalidLink(
                    "secondary contact requires a link".to_string(),
                ));
            }
            (LinkPrecedence::Secondary, Some(target)) => {
                if target == id {
                    return Err(StorageError::InvalidLink(format!(
                        "contact {id} cannot link to itself"
                    )));
                }
                self.require_primary(target)?;
            }
        }

        if current.link_precedence == precedence && current.linked_id == linked_id {
            return Ok(current);
        }

        let updated = Contact {
            link_precedence: precedence,
            linked_id,
            updated_at: self.clock.now(),
            ..current.clone()
        };
        self.table.replace_row(updated.clone());
        self.undo.push(Undo::Restore(current));
        self.journal.push(Mutation::Relink {
            id,
            link_precedence: precedence,
            linked_id,
            updated_at: updated.updated_at,
        });
        Ok(updated)
    }

    fn reparent_children(
        &mut self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<usize, StorageError> {
        if old_linked_id == new_linked_id {
            return Ok(0);
        }
        let children = self.table.children_of(old_linked_id);
        for child in &children {
            self.update_precedence_and_link(*child, LinkPrecedence::Secondary, Some(new_linked_id))?;
        }
        Ok(children.len())
    }

    fn find_cluster(&mut self, primary_id: ContactId) -> Result<Vec<Contact>, StorageError> {
        Ok(self.table.cluster(primary_id))
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if let (Some(log), false) = (self.log, self.journal.is_empty()) {
            if let Err(err) = log.append_commit(&self.journal) {
                self.undo_all();
                self.finished = true;
                return Err(err);
            }
        }
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.undo_all();
        self.finished = true;
        Ok(())
    }
}

impl Drop for TableTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}
