//! Projection of a cluster into its public view.

use std::collections::HashSet;

use crate::contact::{Contact, ContactId};
use crate::error::{ExecutionError, LinkResult};
use crate::storage::ContactTransaction;
use crate::view::IdentityView;

/// Reads the cluster rooted at `primary_id` and projects it.
///
/// # Errors
/// - `InvariantViolation` if the cluster is malformed (see [`build_view`])
/// - any store error from the cluster query
pub fn aggregate(
    tx: &mut dyn ContactTransaction,
    primary_id: ContactId,
) -> LinkResult<IdentityView> {
    let cluster = tx.find_cluster(primary_id)?;
    build_view(primary_id, &cluster)
}

/// Collects unique values, keeping first occurrences in order.
struct Distinct<'a> {
    seen: HashSet<&'a str>,
    values: Vec<String>,
}

impl<'a> Distinct<'a> {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: Option<&'a str>) {
        if let Some(value) = value {
            if self.seen.insert(value) {
                self.values.push(value.to_string());
            }
        }
    }
}

/// Projects a cluster into an [`IdentityView`].
///
/// The primary's own values come first, followed by the values of the other
/// members in ascending id order. Each value appears once.
///
/// # Errors
/// `InvariantViolation` if the primary is missing or not a primary, or if a
/// member does not link to it.
pub fn build_view(primary_id: ContactId, cluster: &[Contact]) -> LinkResult<IdentityView> {
    let Some(primary) = cluster.iter().find(|c| c.id == primary_id) else {
        return Err(ExecutionError::invariant(format!(
            "primary contact {primary_id} missing from its cluster"
        ))
        .into());
    };
    if !primary.is_primary() || !primary.link_is_consistent() {
        return Err(ExecutionError::invariant(format!(
            "cluster root {primary_id} is not a primary"
        ))
        .into());
    }

    let mut members: Vec<&Contact> = cluster.iter().filter(|c| c.id != primary_id).collect();
    members.sort_by_key(|c| c.id);
    if let Some(stray) = members
        .iter()
        .find(|c| !c.is_secondary() || c.linked_id != Some(primary_id))
    {
        return Err(ExecutionError::invariant(format!(
            "contact {} in cluster {primary_id} links to {:?}",
            stray.id, stray.linked_id
        ))
        .into());
    }

    let mut emails = Distinct::new();
    let mut phones = Distinct::new();
    emails.push(primary.email.as_deref());
    phones.push(primary.phone_number.as_deref());
    for member in &members {
        emails.push(member.email.as_deref());
        phones.push(member.phone_number.as_deref());
    }

    Ok(IdentityView {
        primary_contact_id: primary_id,
        emails: emails.values,
        phone_numbers: phones.values,
        secondary_contact_ids: members.iter().map(|c| c.id).collect(),
    })
}
