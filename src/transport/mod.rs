//! gRPC transport layer for contactlink.
//!
//! The service validates the wire request into an [`IdentifyRequest`],
//! hands it to the [`ContactRuntime`] worker pool, and waits for the result
//! on tokio's blocking pool so no reactor thread ever holds a store lock.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::warn;

use crate::engine::runtime::ContactRuntime;
use crate::error::{ExecutionError, LinkError};
use crate::request::IdentifyRequest;
use crate::view::IdentityView;

/// Generated protobuf types and service stubs.
#[allow(missing_docs, clippy::pedantic)]
pub mod proto {
    tonic::include_proto!("contactlink");
}

use proto::contact_service_server::{ContactService, ContactServiceServer};

/// How long a call waits for its worker before reporting `DEADLINE_EXCEEDED`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// gRPC service implementation for contactlink.
pub struct ContactServiceImpl {
    runtime: Arc<ContactRuntime>,
    request_timeout: Duration,
}

impl ContactServiceImpl {
    /// Serve requests through `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<ContactRuntime>) -> Self {
        Self {
            runtime,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides [`DEFAULT_REQUEST_TIMEOUT`].
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Wraps the service for `tonic::transport::Server`.
    #[must_use]
    pub fn into_server(self) -> ContactServiceServer<Self> {
        ContactServiceServer::new(self)
    }
}

/// Maps a reconciliation error onto a gRPC status.
#[must_use]
pub fn status_from_link_error(err: LinkError) -> Status {
    match err {
        LinkError::Validation(v) => Status::invalid_argument(v.to_string()),
        LinkError::Internal { message } => Status::internal(message),
        LinkError::Execution(e) => match e {
            ExecutionError::StoreUnavailable { .. } => Status::unavailable(e.to_string()),
            ExecutionError::TransactionConflict { .. } => Status::aborted(e.to_string()),
            ExecutionError::QueueFull { .. } => Status::resource_exhausted(e.to_string()),
            ExecutionError::Timeout { .. } => Status::deadline_exceeded(e.to_string()),
            ExecutionError::InvariantViolation { .. } | ExecutionError::Disconnected => {
                Status::internal(e.to_string())
            }
        },
    }
}

impl From<IdentityView> for proto::IdentityView {
    fn from(view: IdentityView) -> Self {
        Self {
            primary_contact_id: view.primary_contact_id.get(),
            emails: view.emails,
            phone_numbers: view.phone_numbers,
            secondary_contact_ids: view.secondary_contact_ids.into_iter().map(u64::from).collect(),
        }
    }
}

#[tonic::async_trait]
impl ContactService for ContactServiceImpl {
    async fn identify(
        &self,
        request: Request<proto::IdentifyRequest>,
    ) -> Result<Response<proto::IdentifyResponse>, Status> {
        let req = request.into_inner();
        let identify = IdentifyRequest::new(req.email, req.phone_number)
            .map_err(|e| status_from_link_error(e.into()))?;

        let handle = self
            .runtime
            .submit(identify)
            .map_err(status_from_link_error)?;
        let timeout = self.request_timeout;
        let view = tokio::task::spawn_blocking(move || handle.join_timeout(timeout))
            .await
            .map_err(|e| Status::internal(format!("identify worker failed: {e}")))?
            .map_err(|err| {
                if err.is_invariant_violation() {
                    warn!(error = %err, "identify failed on inconsistent links");
                }
                status_from_link_error(err)
            })?;

        Ok(Response::new(proto::IdentifyResponse {
            contact: Some(view.into()),
        }))
    }
}


pub use proto::contact_service_client::ContactServiceClient;
