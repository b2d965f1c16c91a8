//! gRPC service implementations.
//!
//! Two services share one store:
//!
//! ```text
//! RoleService       ─┐
//!                    ├─→ Arc<dyn Store>
//! PermissionService ─┘
//! ```
//!
//! Each handler bounds its store call with the server's request timeout and
//! maps [`StorageError`] into a tonic [`Status`].

mod conversion;
mod permission_service;
mod role_service;

pub use permission_service::PermissionGrpcService;
pub use role_service::RoleGrpcService;

// Re-export the generated server types for service registration
pub use crate::proto::perm::v1::permission_service_server::PermissionServiceServer;
pub use crate::proto::perm::v1::role_service_server::RoleServiceServer;

use std::future::Future;
use std::time::Duration;

use tonic::Status;

use perm_storage::{ErrorKind, StorageError, StorageResult};

/// Default upper bound on a single store call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Converts a StorageError to a tonic Status.
///
/// Backend details are logged and replaced with a generic message for
/// `Unavailable` and `Internal` errors.
pub fn storage_error_to_status(err: StorageError) -> Status {
    match err.kind() {
        ErrorKind::InvalidArgument => Status::invalid_argument(err.to_string()),
        ErrorKind::NotFound => Status::not_found(err.to_string()),
        ErrorKind::AlreadyExists => Status::already_exists(err.to_string()),
        ErrorKind::Unavailable => {
            tracing::error!(error = %err, "storage backend unavailable");
            Status::unavailable("storage backend unavailable")
        }
        ErrorKind::Internal => {
            tracing::error!(error = %err, "internal storage error");
            Status::internal("internal storage error")
        }
    }
}

/// Runs a store call under `timeout`, mapping both failure paths to a Status.
pub(crate) async fn run_store_call<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = StorageResult<T>>,
) -> Result<T, Status> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(storage_error_to_status),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "store call timed out");
            Err(Status::deadline_exceeded(format!("{operation} timed out")))
        }
    }
}
