//! Token authentication middleware.
//!
//! Every call is checked in order:
//! 1. the request must carry application metadata,
//! 2. a non-empty token must be present under [`TOKEN_METADATA_KEY`],
//! 3. the token must pass the configured [`TokenVerifier`].
//!
//! Each outcome is written to the [`SecurityLogger`]. Rejected calls get
//! `Unauthenticated` and never reach the inner service.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::{HeaderMap, Request, Response};
use tonic::Status;
use tower::{Layer, Service};

use super::status_response;
use crate::auth::{CustomExtension, SecurityLogger, TokenVerifier, VerifiedToken, VerifyError};

/// Metadata key carrying the bearer token.
pub const TOKEN_METADATA_KEY: &str = "token";

const AUDIT_SIGNATURE: &str = "Auth";
const AUDIT_NAME: &str = "Auth";

/// Headers set by the transport or by proxies rather than the application.
const TRANSPORT_HEADERS: [&str; 11] = [
    "te",
    "user-agent",
    "content-type",
    "content-length",
    "accept",
    "accept-encoding",
    "host",
    "forwarded",
    "via",
    "x-real-ip",
    "x-request-id",
];

/// Header prefixes set by the transport or by proxies.
const TRANSPORT_HEADER_PREFIXES: [&str; 3] = ["grpc-", "x-forwarded-", "x-envoy-"];

/// Verified caller identity, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub VerifiedToken);

/// Layer that authenticates calls against a token verifier.
#[derive(Clone)]
pub struct AuthLayer {
    verifier: Arc<dyn TokenVerifier>,
    logger: Arc<dyn SecurityLogger>,
}

impl AuthLayer {
    pub fn new(verifier: Arc<dyn TokenVerifier>, logger: Arc<dyn SecurityLogger>) -> Self {
        Self { verifier, logger }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            verifier: Arc::clone(&self.verifier),
            logger: Arc::clone(&self.logger),
        }
    }
}

/// Service that rejects unauthenticated calls before they reach `S`.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    verifier: Arc<dyn TokenVerifier>,
    logger: Arc<dyn SecurityLogger>,
}

enum Rejection {
    NoMetadata,
    NoToken,
    Invalid(VerifyError),
}

impl Rejection {
    fn reason(&self) -> String {
        match self {
            Rejection::NoMetadata => "no metadata".to_string(),
            Rejection::NoToken => "no token".to_string(),
            Rejection::Invalid(err) => err.to_string(),
        }
    }

    fn status(&self) -> Status {
        match self {
            Rejection::NoMetadata | Rejection::NoToken => {
                Status::unauthenticated("missing authentication token")
            }
            Rejection::Invalid(_) => Status::unauthenticated("invalid authentication token"),
        }
    }
}

fn has_application_metadata(headers: &HeaderMap) -> bool {
    headers.keys().any(|name| {
        let name = name.as_str();
        !TRANSPORT_HEADERS.contains(&name)
            && !TRANSPORT_HEADER_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
    })
}

impl<S> AuthService<S> {
    fn authenticate(&self, headers: &HeaderMap) -> Result<VerifiedToken, Rejection> {
        if !has_application_metadata(headers) {
            return Err(Rejection::NoMetadata);
        }

        let token = headers
            .get(TOKEN_METADATA_KEY)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(Rejection::NoToken)?;

        self.verifier.verify(token).map_err(Rejection::Invalid)
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        match self.authenticate(request.headers()) {
            Ok(verified) => {
                self.logger.log(
                    AUDIT_SIGNATURE,
                    AUDIT_NAME,
                    &[
                        CustomExtension::new("msg", "authentication succeeded"),
                        CustomExtension::new("subject", verified.subject.as_str()),
                    ],
                );
                request
                    .extensions_mut()
                    .insert(AuthenticatedSubject(verified));

                let mut inner = self.inner.clone();
                Box::pin(inner.call(request))
            }
            Err(rejection) => {
                let reason = rejection.reason();
                self.logger.log(
                    AUDIT_SIGNATURE,
                    AUDIT_NAME,
                    &[CustomExtension::new("msg", reason.as_str())],
                );
                tracing::debug!(rpc = %request.uri().path(), reason = %reason, "rejected unauthenticated call");
                metrics::counter!("perm_auth_rejections_total").increment(1);

                let response: Response<ResBody> = status_response(&rejection.status());
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
