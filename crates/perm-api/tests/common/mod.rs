//! Shared test utilities for perm API tests.
//!
//! Provides a store wrapper that counts and delays calls, an audit sink that
//! records entries, token minting, and helpers to run a server on an
//! ephemeral port.

// Allow dead_code because helpers are used across different test files,
// but each test file is compiled as its own crate.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::transport::Channel;

use perm_api::auth::{Claims, CustomExtension, JwtVerifier, SecurityLogger, TokenVerifier};
use perm_api::proto::perm::v1::permission_service_client::PermissionServiceClient;
use perm_api::proto::perm::v1::role_service_client::RoleServiceClient;
use perm_api::{PermServer, ServerBuilder, ServerError, ServerState};
use perm_storage::{
    Actor, Group, HasPermissionQuery, ListResourcePatternsQuery, MemoryStore, Permission,
    PermissionRepo, Role, RoleKey, RoleRepo, StorageResult,
};

/// Issuer used for test tokens.
pub const ISSUER: &str = "http://localhost:6789";

/// Shared secret used for test tokens.
pub const TOKEN_SECRET: &[u8] = b"tokensecret";

/// Timeout for client operations in tests.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory store that counts every call and can delay or panic on checks.
#[derive(Default)]
pub struct InstrumentedStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    check_delay: Option<Duration>,
    panic_on_check: bool,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_delay(delay: Duration) -> Self {
        Self {
            check_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_check: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionRepo for InstrumentedStore {
    async fn has_permission(&self, query: &HasPermissionQuery) -> StorageResult<bool> {
        self.record();
        if self.panic_on_check {
            panic!("store exploded");
        }
        if let Some(delay) = self.check_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.has_permission(query).await
    }

    async fn list_resource_patterns(
        &self,
        query: &ListResourcePatternsQuery,
    ) -> StorageResult<Vec<String>> {
        self.record();
        self.inner.list_resource_patterns(query).await
    }

    async fn assign_permission(
        &self,
        role: &RoleKey,
        permission: Permission,
    ) -> StorageResult<()> {
        self.record();
        self.inner.assign_permission(role, permission).await
    }

    async fn unassign_permission(
        &self,
        role: &RoleKey,
        permission: &Permission,
    ) -> StorageResult<()> {
        self.record();
        self.inner.unassign_permission(role, permission).await
    }

    async fn list_role_permissions(&self, role: &RoleKey) -> StorageResult<Vec<Permission>> {
        self.record();
        self.inner.list_role_permissions(role).await
    }
}

#[async_trait]
impl RoleRepo for InstrumentedStore {
    async fn create_role(
        &self,
        role: &RoleKey,
        permissions: Vec<Permission>,
    ) -> StorageResult<Role> {
        self.record();
        self.inner.create_role(role, permissions).await
    }

    async fn delete_role(&self, role: &RoleKey) -> StorageResult<()> {
        self.record();
        self.inner.delete_role(role).await
    }

    async fn assign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()> {
        self.record();
        self.inner.assign_role(role_name, actor).await
    }

    async fn assign_role_to_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()> {
        self.record();
        self.inner.assign_role_to_group(role, group).await
    }

    async fn unassign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()> {
        self.record();
        self.inner.unassign_role(role_name, actor).await
    }

    async fn unassign_role_from_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()> {
        self.record();
        self.inner.unassign_role_from_group(role, group).await
    }

    async fn has_role(&self, role_name: &str, actor: &Actor) -> StorageResult<bool> {
        self.record();
        self.inner.has_role(role_name, actor).await
    }

    async fn has_role_for_group(&self, role: &RoleKey, group: &Group) -> StorageResult<bool> {
        self.record();
        self.inner.has_role_for_group(role, group).await
    }

    async fn list_actor_roles(&self, actor: &Actor) -> StorageResult<Vec<Role>> {
        self.record();
        self.inner.list_actor_roles(actor).await
    }
}

/// Audit sink that keeps every entry for inspection.
#[derive(Default)]
pub struct RecordingSecurityLogger {
    entries: Mutex<Vec<Vec<CustomExtension>>>,
}

impl RecordingSecurityLogger {
    /// The `msg` extension of every recorded entry, in order.
    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .flat_map(|ext| ext.iter().filter(|e| e.key == "msg"))
            .map(|e| e.value.clone())
            .collect()
    }
}

impl SecurityLogger for RecordingSecurityLogger {
    fn log(&self, _signature: &str, _name: &str, extensions: &[CustomExtension]) {
        self.entries.lock().unwrap().push(extensions.to_vec());
    }
}

/// HS256 verifier matching [`mint_token`].
pub fn test_verifier() -> Arc<dyn TokenVerifier> {
    Arc::new(
        JwtVerifier::with_secret(Algorithm::HS256, TOKEN_SECRET, ISSUER)
            .unwrap()
            .with_audience(""),
    )
}

/// Mints an HS256 token for `subject` signed with `secret`.
pub fn mint_token(subject: &str, secret: &[u8]) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let claims = Claims {
        sub: subject.to_string(),
        iss: ISSUER.to_string(),
        exp: now + 300,
        scope: vec!["perm.admin".to_string()],
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .unwrap()
}

/// A server running on an ephemeral port.
pub struct TestServer {
    pub server: Arc<PermServer>,
    pub addr: SocketAddr,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn channel(&self) -> Channel {
        Channel::from_shared(self.url())
            .unwrap()
            .timeout(CLIENT_TIMEOUT)
            .connect()
            .await
            .unwrap()
    }

    pub async fn role_client(&self) -> RoleServiceClient<Channel> {
        RoleServiceClient::new(self.channel().await)
    }

    pub async fn permission_client(&self) -> PermissionServiceClient<Channel> {
        PermissionServiceClient::new(self.channel().await)
    }
}

/// Builds the server, binds 127.0.0.1:0 and serves in a background task.
pub async fn start_server(builder: ServerBuilder) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(builder.build());

    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move { serving.serve(listener).await });

    tokio::time::timeout(CLIENT_TIMEOUT, async {
        while server.state() != ServerState::Serving {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("server should start serving");

    TestServer {
        server,
        addr,
        handle,
    }
}
