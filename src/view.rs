//! The public, de-duplicated view of an identity cluster.

use serde::{Deserialize, Serialize};

use crate::contact::ContactId;

/// Consolidated identity returned by identify.
///
/// `emails` and `phone_numbers` list the primary's own value first, then
/// the values of the other cluster members in ascending id order, each
/// value at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    /// Id of the cluster's primary contact.
    pub primary_contact_id: ContactId,
    /// Unique emails, primary's first.
    pub emails: Vec<String>,
    /// Unique phone numbers, primary's first.
    pub phone_numbers: Vec<String>,
    /// Ids of every other cluster member, ascending.
    pub secondary_contact_ids: Vec<ContactId>,
}

impl IdentityView {
    /// Total number of contacts in the cluster.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        self.secondary_contact_ids.len() + 1
    }
}

/// Response envelope used by the transports: `{ "contact": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    /// The reconciled identity.
    pub contact: IdentityView,
}

impl From<IdentityView> for IdentifyResponse {
    fn from(contact: IdentityView) -> Self {
        Self { contact }
    }
}
