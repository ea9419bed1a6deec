//! Surviving-primary selection and merge.
//!
//! Every matched contact belongs to some cluster. The roots of those
//! clusters compete; the most senior one survives and every other root is
//! demoted beneath it, taking its secondaries along.

use tracing::{info, warn};

use crate::contact::{Contact, ContactId, LinkPrecedence};
use crate::error::{ExecutionError, LinkResult};
use crate::storage::ContactTransaction;

/// Outcome of primary resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing matched; the observation starts a new identity.
    NoMatch,
    /// The observation belongs to an existing identity.
    Matched(ResolvedPrimary),
}

/// The primary that represents the observation after any merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrimary {
    /// The surviving primary row.
    pub primary: Contact,
    /// Former primaries demoted beneath the survivor, most senior first.
    pub demoted: Vec<ContactId>,
    /// Secondaries moved from a demoted primary to the survivor.
    pub reparented: usize,
}

impl ResolvedPrimary {
    /// Returns true if two or more identities were merged.
    #[must_use]
    pub fn merged(&self) -> bool {
        !self.demoted.is_empty()
    }
}

fn check_candidate(contact: &Contact) -> LinkResult<()> {
    if contact.link_is_consistent() {
        return Ok(());
    }
    Err(ExecutionError::invariant(format!(
        "contact {} is {} with linked_id {:?}",
        contact.id, contact.link_precedence, contact.linked_id
    ))
    .into())
}

/// Loads the primary a secondary points at.
fn root_of(tx: &mut dyn ContactTransaction, secondary: &Contact) -> LinkResult<Contact> {
    let Some(target) = secondary.linked_id else {
        return Err(ExecutionError::invariant(format!(
            "secondary contact {} has no linked_id",
            secondary.id
        ))
        .into());
    };
    match tx.get(target)? {
        Some(root) if root.is_primary() => Ok(root),
        Some(_) => Err(ExecutionError::invariant(format!(
            "secondary contact {} links to secondary {target}",
            secondary.id
        ))
        .into()),
        None => Err(ExecutionError::invariant(format!(
            "secondary contact {} links to missing contact {target}",
            secondary.id
        ))
        .into()),
    }
}

/// Picks the surviving primary for `candidates` and merges the others
/// into it.
///
/// `candidates` must be ordered by `(created_at, id)`, as the matcher
/// returns them. Direct primaries are taken as-is; a matched secondary
/// contributes the primary it links to. When no candidate is a primary the
/// first candidate's cluster root is used and the event is logged.
///
/// # Errors
/// - `InvariantViolation` if a candidate's precedence and link disagree, or a
///   secondary links to a missing row or to another secondary
/// - any store error raised by demotion or re-parenting
pub fn resolve_primary(
    tx: &mut dyn ContactTransaction,
    candidates: &[Contact],
) -> LinkResult<Resolution> {
    let Some(first) = candidates.first() else {
        return Ok(Resolution::NoMatch);
    };
    for candidate in candidates {
        check_candidate(candidate)?;
    }

    let mut roots: Vec<Contact> = candidates
        .iter()
        .filter(|c| c.is_primary())
        .cloned()
        .collect();
    if roots.is_empty() {
        warn!(
            contact_id = %first.id,
            "no primary among matched contacts; falling back to the earliest candidate's cluster"
        );
    }
    for candidate in candidates.iter().filter(|c| c.is_secondary()) {
        if roots.iter().any(|r| Some(r.id) == candidate.linked_id) {
            continue;
        }
        let root = root_of(tx, candidate)?;
        roots.push(root);
    }

    roots.sort_by_key(Contact::seniority);
    roots.dedup_by_key(|c| c.id);

    let mut roots = roots.into_iter();
    let Some(survivor) = roots.next() else {
        return Err(ExecutionError::invariant("matched contacts resolved to no primary").into());
    };

    let mut demoted = Vec::new();
    let mut reparented = 0;
    for loser in roots {
        tx.update_precedence_and_link(loser.id, LinkPrecedence::Secondary, Some(survivor.id))?;
        reparented += tx.reparent_children(loser.id, survivor.id)?;
        demoted.push(loser.id);
    }

    if !demoted.is_empty() {
        info!(
            primary = %survivor.id,
            demoted = ?demoted,
            reparented,
            "merged identity clusters"
        );
    }

    Ok(Resolution::Matched(ResolvedPrimary {
        primary: survivor,
        demoted,
        reparented,
    }))
}
