//! Candidate lookup.

use tracing::debug;

use crate::contact::Contact;
use crate::error::LinkResult;
use crate::request::IdentifyRequest;
use crate::storage::ContactTransaction;

/// Every contact sharing the request's email or phone number, oldest first.
///
/// Ordering is `(created_at, id)` ascending, so the first candidate is the
/// earliest observation. An empty result means the identity is new.
pub fn find_candidates(
    tx: &mut dyn ContactTransaction,
    request: &IdentifyRequest,
) -> LinkResult<Vec<Contact>> {
    let candidates = tx.find_by_email_or_phone(request.email(), request.phone_number())?;
    debug!(candidates = candidates.len(), "matched existing contacts");
    Ok(candidates)
}
