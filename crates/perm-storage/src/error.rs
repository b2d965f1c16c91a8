//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
///
/// Every backend reports failures through this type so that the RPC layer
/// can map them to a status code without knowing which backend produced them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Role not found in the given namespace.
    #[error("role not found: {namespace}/{name}")]
    RoleNotFound { namespace: String, name: String },

    /// Role already exists in the given namespace.
    #[error("role already exists: {namespace}/{name}")]
    RoleAlreadyExists { namespace: String, name: String },

    /// Role assignment not found.
    #[error("role assignment not found: {namespace}/{role} -> {assignee}")]
    AssignmentNotFound {
        namespace: String,
        role: String,
        assignee: String,
    },

    /// Permission not held by the role.
    #[error("permission not found on role {namespace}/{role}: {action} {resource_pattern}")]
    PermissionNotFound {
        namespace: String,
        role: String,
        action: String,
        resource_pattern: String,
    },

    /// Unique constraint violation that does not map to a known entity.
    #[error("already exists: {message}")]
    AlreadyExists { message: String },

    /// Referenced entity vanished while the statement ran.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Query timeout error.
    #[error("query timeout: {operation} exceeded {timeout:?}")]
    QueryTimeout {
        operation: String,
        timeout: std::time::Duration,
    },

    /// Schema migrations are missing.
    #[error("storage not ready: {message}")]
    NotReady { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Coarse classification of a [`StorageError`].
///
/// The RPC layer maps each kind to exactly one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Unavailable,
    Internal,
}

impl StorageError {
    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::RoleNotFound { .. }
            | StorageError::AssignmentNotFound { .. }
            | StorageError::PermissionNotFound { .. }
            | StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::RoleAlreadyExists { .. } | StorageError::AlreadyExists { .. } => {
                ErrorKind::AlreadyExists
            }
            StorageError::InvalidInput { .. } => ErrorKind::InvalidArgument,
            StorageError::ConnectionError { .. }
            | StorageError::QueryTimeout { .. }
            | StorageError::NotReady { .. } => ErrorKind::Unavailable,
            StorageError::QueryError { .. } | StorageError::InternalError { .. } => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        StorageError::InvalidInput {
            message: message.into(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
