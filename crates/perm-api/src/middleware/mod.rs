//! Request-gating middleware for the gRPC server.
//!
//! Includes:
//! - Panic recovery (outermost)
//! - Abort on hard stop
//! - Token authentication with security audit logging
//!
//! All layers are plain `tower` layers over `http` requests, so they sit
//! in front of tonic's router through `Server::builder().layer(..)`.

mod abort;
mod auth;
mod recovery;

pub use abort::{AbortLayer, AbortService};
pub use auth::{AuthLayer, AuthService, AuthenticatedSubject, TOKEN_METADATA_KEY};
pub use recovery::{RecoveryLayer, RecoveryService};

use http::{header, HeaderValue, Response};
use tonic::Status;

/// Builds a trailers-only gRPC response carrying `status`.
pub(crate) fn status_response<B: Default>(status: &Status) -> Response<B> {
    let mut response = Response::new(B::default());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    if let Err(err) = status.add_header(response.headers_mut()) {
        tracing::error!(error = %err, "failed to encode grpc status headers");
    }
    response
}

#[cfg(test)]
mod tests;
