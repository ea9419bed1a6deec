//! Identity reconciliation.
//!
//! One observation flows through four stages inside a single transaction:
//!
//! ```text
//! IdentifyRequest
//!     │
//!     ▼
//! matcher      contacts sharing the email or phone number
//!     │
//!     ▼
//! resolver     surviving primary; other primaries demoted and re-parented
//!     │
//!     ▼
//! link_writer  fresh primary, or a secondary when a value is new
//!     │
//!     ▼
//! aggregator   cluster projected into an IdentityView
//! ```
//!
//! Nothing here commits. The caller owns the transaction and decides.

pub mod aggregator;
pub mod link_writer;
pub mod matcher;
pub mod resolver;

pub use aggregator::{aggregate, build_view};
pub use link_writer::{write_links, Novelty};
pub use matcher::find_candidates;
pub use resolver::{resolve_primary, Resolution, ResolvedPrimary};

use crate::contact::ContactId;
use crate::error::{ExecutionError, LinkResult};
use crate::request::IdentifyRequest;
use crate::storage::ContactTransaction;
use crate::view::IdentityView;

/// What one reconciliation produced and changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The consolidated identity.
    pub view: IdentityView,
    /// Contact inserted for this observation, if any.
    pub created: Option<ContactId>,
    /// Former primaries demoted by a merge.
    pub demoted: Vec<ContactId>,
    /// Secondaries moved to the survivor by a merge.
    pub reparented: usize,
}

impl Reconciliation {
    /// Returns true if the observation wrote anything.
    #[must_use]
    pub fn changed_store(&self) -> bool {
        self.created.is_some() || !self.demoted.is_empty()
    }
}

/// Runs the full sequence against an open transaction.
///
/// On error the transaction may hold partial writes; dropping it without
/// committing discards them.
pub fn reconcile(
    tx: &mut dyn ContactTransaction,
    request: &IdentifyRequest,
) -> LinkResult<Reconciliation> {
    let candidates = find_candidates(tx, request)?;
    let resolution = resolve_primary(tx, &candidates)?;
    let created = write_links(tx, request, &candidates, &resolution)?;

    let (primary_id, demoted, reparented) = match resolution {
        Resolution::Matched(resolved) => (resolved.primary.id, resolved.demoted, resolved.reparented),
        Resolution::NoMatch => match &created {
            Some(primary) => (primary.id, Vec::new(), 0),
            None => {
                return Err(ExecutionError::invariant("new identity produced no primary").into())
            }
        },
    };

    let view = aggregate(tx, primary_id)?;
    Ok(Reconciliation {
        view,
        created: created.map(|c| c.id),
        demoted,
        reparented,
    })
}
