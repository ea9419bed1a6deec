//! Contact types and link precedence.
//!
//! A contact is one observed (email, phone number) pair. Contacts sharing
//! either value form an identity cluster: one primary plus the secondaries
//! whose `linked_id` points at it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, monotonically assigned contact identifier.
///
/// Ids start at 1 and are never reused, so ordering by id is insertion order.
///
/// # Examples
///
/// ```
/// use contactlink::ContactId;
///
/// let id = ContactId::new(3);
/// assert_eq!(id.get(), 3);
/// assert!(ContactId::new(2) < id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    /// First id handed out by an empty store.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id that follows this one, or `None` at `u64::MAX`.
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContactId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<ContactId> for u64 {
    fn from(id: ContactId) -> Self {
        id.0
    }
}

/// Whether a contact represents its cluster or is attached to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    /// Canonical representative of a cluster.
    Primary,
    /// Attached to a primary through `linked_id`.
    Secondary,
}

impl LinkPrecedence {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored contact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Store-assigned identifier.
    pub id: ContactId,
    /// Observed email, if any.
    pub email: Option<String>,
    /// Observed phone number, if any.
    pub phone_number: Option<String>,
    /// Primary or secondary.
    pub link_precedence: LinkPrecedence,
    /// The primary this contact is attached to; `None` for primaries.
    pub linked_id: Option<ContactId>,
    /// Insert time; only used to order competing primaries.
    pub created_at: DateTime<Utc>,
    /// Last time demotion or re-parenting touched the row.
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Returns true if the contact is a primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns true if the contact is a secondary.
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Secondary
    }

    /// Returns true if precedence and link agree: primaries carry no link,
    /// secondaries always do.
    #[must_use]
    pub fn link_is_consistent(&self) -> bool {
        match self.link_precedence {
            LinkPrecedence::Primary => self.linked_id.is_none(),
            LinkPrecedence::Secondary => self.linked_id.is_some(),
        }
    }

    /// Key used to pick the surviving primary: earliest `created_at`, then
    /// lowest id.
    #[must_use]
    pub fn seniority(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }
}

/// Values for a contact that the store has not assigned an id to yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    /// Email to store.
    pub email: Option<String>,
    /// Phone number to store.
    pub phone_number: Option<String>,
    /// Precedence of the new row.
    pub link_precedence: LinkPrecedence,
    /// Link target; must be a primary when precedence is secondary.
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// A fresh primary carrying the given values.
    #[must_use]
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// A fresh secondary attached to `primary`.
    #[must_use]
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary),
        }
    }

    /// Materializes the row with an assigned id and timestamp.
    #[must_use]
    pub fn into_contact(self, id: ContactId, now: DateTime<Utc>) -> Contact {
        Contact {
            id,
            email: self.email,
            phone_number: self.phone_number,
            link_precedence: self.link_precedence,
            linked_id: self.linked_id,
            created_at: now,
            updated_at: now,
        }
    }
}
