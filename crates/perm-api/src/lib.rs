//! perm-api: gRPC API layer for the perm authorization service
//!
//! This crate provides:
//! - `RoleService` and `PermissionService` via Tonic
//! - Request-gating middleware (panic recovery, token authentication)
//! - Token verification and security audit logging
//! - Server composition and lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  perm-api                    │
//! ├─────────────────────────────────────────────┤
//! │  auth/          - Token verifier, audit log │
//! │  middleware/    - Recovery, abort, auth     │
//! │  grpc/          - Service implementations   │
//! │  server.rs      - Composition, lifecycle    │
//! │  observability/ - Logging setup             │
//! └─────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod grpc;
pub mod middleware;
pub mod observability;
pub mod server;

pub use server::{PermServer, ServerBuilder, ServerError, ServerState};

/// Generated protobuf types.
pub mod proto {
    pub mod perm {
        pub mod v1 {
            tonic::include_proto!("perm.v1");
        }
    }
}
