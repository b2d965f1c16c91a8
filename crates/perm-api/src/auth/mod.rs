//! Token verification and security audit logging.
//!
//! The auth middleware depends on two injected collaborators:
//! - a [`TokenVerifier`] that turns a raw token into a verified subject,
//! - a [`SecurityLogger`] that records every authentication outcome.

mod audit;
mod verifier;

pub use audit::{
    CustomExtension, NoopSecurityLogger, SecurityLogger, TracingSecurityLogger, SECURITY_LOG_TARGET,
};
pub use verifier::{parse_algorithm, Claims, JwtVerifier, TokenVerifier, VerifiedToken, VerifyError};
