//! Middleware tests for the authentication and recovery layers.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use http::{HeaderValue, Request, Response};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tonic::{Code, Status};
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};

use super::*;
use crate::auth::{
    Claims, CustomExtension, JwtVerifier, SecurityLogger, TokenVerifier, VerifiedToken,
    VerifyError,
};

const ISSUER: &str = "http://localhost:6789";
const SECRET: &[u8] = b"tokensecret";

/// Audit sink that keeps every entry for inspection.
#[derive(Default)]
struct RecordingSecurityLogger {
    entries: Mutex<Vec<(String, String, Vec<CustomExtension>)>>,
}

impl RecordingSecurityLogger {
    fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, _, ext)| ext.iter().filter(|e| e.key == "msg"))
            .map(|e| e.value.clone())
            .collect()
    }

    fn entries(&self) -> Vec<(String, String, Vec<CustomExtension>)> {
        self.entries.lock().unwrap().clone()
    }
}

impl SecurityLogger for RecordingSecurityLogger {
    fn log(&self, signature: &str, name: &str, extensions: &[CustomExtension]) {
        self.entries.lock().unwrap().push((
            signature.to_string(),
            name.to_string(),
            extensions.to_vec(),
        ));
    }
}

struct PanickingVerifier;

impl TokenVerifier for PanickingVerifier {
    fn verify(&self, _token: &str) -> Result<VerifiedToken, VerifyError> {
        panic!("verifier exploded")
    }
}

/// Inner service that counts calls and echoes the authenticated subject.
#[derive(Clone)]
struct CountingService {
    calls: Arc<AtomicUsize>,
}

impl Service<Request<()>> for CountingService {
    type Response = Response<String>;
    type Error = Infallible;
    type Future = std::future::Ready<Result<Response<String>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<()>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let subject = request
            .extensions()
            .get::<AuthenticatedSubject>()
            .map(|s| s.0.subject.clone())
            .unwrap_or_default();
        std::future::ready(Ok(Response::new(subject)))
    }
}

fn counting_service(calls: Arc<AtomicUsize>) -> CountingService {
    CountingService { calls }
}

async fn panicking_handler(_request: Request<()>) -> Result<Response<String>, Infallible> {
    panic!("handler exploded")
}

/// Service whose `call` panics before producing a future.
#[derive(Clone)]
struct SyncPanicService;

impl Service<Request<()>> for SyncPanicService {
    type Response = Response<String>;
    type Error = Infallible;
    type Future = std::future::Ready<Result<Response<String>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: Request<()>) -> Self::Future {
        panic!("call exploded")
    }
}

fn mint_token(sub: &str, secret: &[u8]) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let claims = Claims {
        sub: sub.to_string(),
        iss: ISSUER.to_string(),
        exp: now + 300,
        scope: vec![],
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .unwrap()
}

fn verifier() -> Arc<dyn TokenVerifier> {
    Arc::new(
        JwtVerifier::with_secret(Algorithm::HS256, SECRET, ISSUER)
            .unwrap()
            .with_audience(""),
    )
}

/// A request shaped like one sent by a tonic client.
fn grpc_request() -> Request<()> {
    Request::builder()
        .uri("/perm.v1.PermissionService/HasPermission")
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .header("user-agent", "tonic/0.12")
        .header("grpc-timeout", "5S")
        .body(())
        .unwrap()
}

fn grpc_request_with_token(token: &str) -> Request<()> {
    let mut request = grpc_request();
    request
        .headers_mut()
        .insert(TOKEN_METADATA_KEY, HeaderValue::from_str(token).unwrap());
    request
}

fn status_of<B>(response: &Response<B>) -> Option<Status> {
    Status::from_header_map(response.headers())
}

/// Test: Headers added by proxies do not count as application metadata
#[tokio::test]
async fn test_proxy_headers_are_not_metadata() {
    let calls = Arc::new(AtomicUsize::new(0));
    let logger = Arc::new(RecordingSecurityLogger::default());
    let service = ServiceBuilder::new()
        .layer(AuthLayer::new(verifier(), logger.clone()))
        .service(counting_service(Arc::clone(&calls)));

    let mut request = grpc_request();
    let headers = request.headers_mut();
    headers.insert("accept", HeaderValue::from_static("*/*"));
    headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
    headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
    headers.insert("x-envoy-expected-rq-timeout-ms", HeaderValue::from_static("5000"));
    headers.insert("via", HeaderValue::from_static("1.1 proxy"));

    let response = service.oneshot(request).await.unwrap();

    let status = status_of(&response).expect("grpc status header");
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(logger.messages(), vec!["no metadata".to_string()]);
}

/// Test: Requests without metadata are rejected before the handler
#[tokio::test]
async fn test_no_metadata_is_unauthenticated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let logger = Arc::new(RecordingSecurityLogger::default());
    let service = ServiceBuilder::new()
        .layer(AuthLayer::new(verifier(), logger.clone()))
        .service(counting_service(Arc::clone(&calls)));

    let response = service.oneshot(grpc_request()).await.unwrap();

    let status = status_of(&response).expect("grpc status header");
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/grpc"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(logger.messages(), vec!["no metadata".to_string()]);

    let (signature, name, _) = &logger.entries()[0];
    assert_eq!(signature, "Auth");
    assert_eq!(name, "Auth");
}

/// Test: Application metadata without a token is rejected
#[tokio::test]
async fn test_missing_token_is_unauthenticated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let logger = Arc::new(RecordingSecurityLogger::default());
    let service = ServiceBuilder::new()
        .layer(AuthLayer::new(verifier(), logger.clone()))
        .service(counting_service(Arc::clone(&calls)));

    let mut request = grpc_request();
    request
        .headers_mut()
        .insert("x-correlation-id", HeaderValue::from_static("abc"));
    let response = service.clone().oneshot(request).await.unwrap();
    assert_eq!(status_of(&response).unwrap().code(), Code::Unauthenticated);

    let response = service
        .oneshot(grpc_request_with_token("   "))
        .await
        .unwrap();
    assert_eq!(status_of(&response).unwrap().code(), Code::Unauthenticated);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        logger.messages(),
        vec!["no token".to_string(), "no token".to_string()]
    );
}

/// Test: A token with a bad signature is rejected and the error is audited
#[tokio::test]
async fn test_bad_signature_is_unauthenticated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let logger = Arc::new(RecordingSecurityLogger::default());
    let service = ServiceBuilder::new()
        .layer(AuthLayer::new(verifier(), logger.clone()))
        .service(counting_service(Arc::clone(&calls)));

    let token = mint_token("user-1", b"wrongsecret");
    let expected_reason = verifier().verify(&token).unwrap_err().to_string();

    let response = service
        .oneshot(grpc_request_with_token(&token))
        .await
        .unwrap();

    assert_eq!(status_of(&response).unwrap().code(), Code::Unauthenticated);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(logger.messages(), vec![expected_reason.clone()]);
    assert!(expected_reason.contains("InvalidSignature"));
}

/// Test: A valid token reaches the handler with the subject attached
#[tokio::test]
async fn test_valid_token_is_forwarded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let logger = Arc::new(RecordingSecurityLogger::default());
    let service = ServiceBuilder::new()
        .layer(AuthLayer::new(verifier(), logger.clone()))
        .service(counting_service(Arc::clone(&calls)));

    let response = service
        .oneshot(grpc_request_with_token(&mint_token("user-1", SECRET)))
        .await
        .unwrap();

    assert!(status_of(&response).is_none());
    assert_eq!(response.body(), "user-1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (_, _, extensions) = &logger.entries()[0];
    assert_eq!(
        extensions,
        &vec![
            CustomExtension::new("msg", "authentication succeeded"),
            CustomExtension::new("subject", "user-1"),
        ]
    );
}

/// Test: Panics inside the handler future become Internal
#[tokio::test]
async fn test_recovery_converts_async_panic() {
    let service = ServiceBuilder::new()
        .layer(RecoveryLayer::new())
        .service(service_fn(panicking_handler));

    let response = service.oneshot(grpc_request()).await.unwrap();

    let status = status_of(&response).unwrap();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "internal error");
}

/// Test: Panics raised while dispatching the call become Internal
#[tokio::test]
async fn test_recovery_converts_sync_panic() {
    let service = ServiceBuilder::new()
        .layer(RecoveryLayer::new())
        .service(SyncPanicService);

    let response = service.oneshot(grpc_request()).await.unwrap();
    assert_eq!(status_of(&response).unwrap().code(), Code::Internal);
}

/// Test: Recovery wraps auth, so a panicking verifier is contained
#[tokio::test]
async fn test_recovery_contains_verifier_panic() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = ServiceBuilder::new()
        .layer(RecoveryLayer::new())
        .layer(AuthLayer::new(
            Arc::new(PanickingVerifier),
            Arc::new(RecordingSecurityLogger::default()),
        ))
        .service(counting_service(Arc::clone(&calls)));

    let response = service
        .oneshot(grpc_request_with_token("anything"))
        .await
        .unwrap();

    assert_eq!(status_of(&response).unwrap().code(), Code::Internal);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test: Recovery leaves successful responses untouched
#[tokio::test]
async fn test_recovery_passes_through_responses() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut service = ServiceBuilder::new()
        .layer(RecoveryLayer::new())
        .service(counting_service(Arc::clone(&calls)));

    for _ in 0..3 {
        let response = service
            .ready()
            .await
            .unwrap()
            .call(grpc_request())
            .await
            .unwrap();
        assert!(status_of(&response).is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

async fn slow_handler(_request: Request<()>) -> Result<Response<String>, Infallible> {
    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    Ok(Response::new("finished".to_string()))
}

/// Test: Raising the abort flag cancels running and future calls
#[tokio::test]
async fn test_abort_cancels_in_flight_calls() {
    let (abort_tx, abort_rx) = tokio::sync::watch::channel(false);
    let service = ServiceBuilder::new()
        .layer(AbortLayer::new(abort_rx))
        .service(service_fn(slow_handler));

    let in_flight = tokio::spawn(service.clone().oneshot(grpc_request()));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    abort_tx.send_replace(true);

    let response = tokio::time::timeout(std::time::Duration::from_secs(5), in_flight)
        .await
        .expect("call should be cancelled promptly")
        .unwrap()
        .unwrap();
    assert_eq!(status_of(&response).unwrap().code(), Code::Unavailable);

    let response = service.oneshot(grpc_request()).await.unwrap();
    assert_eq!(status_of(&response).unwrap().code(), Code::Unavailable);
}
