//! Persists the observation itself when it adds information.

use std::collections::HashSet;

use tracing::debug;

use crate::contact::{Contact, NewContact};
use crate::error::LinkResult;
use crate::request::IdentifyRequest;
use crate::storage::ContactTransaction;

use super::resolver::Resolution;

/// Which supplied values were not yet known to the matched contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Novelty {
    /// The email is present and no candidate carries it.
    pub email: bool,
    /// The phone number is present and no candidate carries it.
    pub phone_number: bool,
}

impl Novelty {
    /// Compares the request against the matched contacts.
    #[must_use]
    pub fn of(request: &IdentifyRequest, candidates: &[Contact]) -> Self {
        let emails: HashSet<&str> = candidates.iter().filter_map(|c| c.email.as_deref()).collect();
        let phones: HashSet<&str> = candidates
            .iter()
            .filter_map(|c| c.phone_number.as_deref())
            .collect();
        Self {
            email: request.email().is_some_and(|e| !emails.contains(e)),
            phone_number: request.phone_number().is_some_and(|p| !phones.contains(p)),
        }
    }

    /// Returns true if either value is new.
    #[must_use]
    pub fn any(self) -> bool {
        self.email || self.phone_number
    }
}

/// Writes the row an observation calls for, if any.
///
/// With no match a fresh primary is inserted. With a match, one secondary
/// carrying both supplied values is linked to the survivor when at least one
/// value is new; a fully known observation writes nothing.
pub fn write_links(
    tx: &mut dyn ContactTransaction,
    request: &IdentifyRequest,
    candidates: &[Contact],
    resolution: &Resolution,
) -> LinkResult<Option<Contact>> {
    let (email, phone_number) = request.to_values();
    match resolution {
        Resolution::NoMatch => {
            let primary = tx.insert(NewContact::primary(email, phone_number))?;
            debug!(contact_id = %primary.id, "created primary contact");
            Ok(Some(primary))
        }
        Resolution::Matched(resolved) => {
            if !Novelty::of(request, candidates).any() {
                return Ok(None);
            }
            let secondary = tx.insert(NewContact::secondary(
                email,
                phone_number,
                resolved.primary.id,
            ))?;
            debug!(
                contact_id = %secondary.id,
                primary = %resolved.primary.id,
                "attached secondary contact"
            );
            Ok(Some(secondary))
        }
    }
}
