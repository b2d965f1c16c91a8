//! gRPC server composition and lifecycle.
//!
//! A [`PermServer`] moves through
//! `Unstarted → Serving → {Draining → Stopped | Stopped}`:
//!
//! - [`PermServer::serve`] starts serving on a bound listener,
//! - [`PermServer::graceful_stop`] stops accepting calls and waits for
//!   in-flight calls to finish,
//! - [`PermServer::stop`] aborts in-flight calls and returns immediately.
//!
//! Every call passes through the same chain:
//!
//! ```text
//! Recovery → Abort → Auth (if a verifier is configured) → RoleService / PermissionService → Store
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tower::ServiceBuilder;
use tracing::info;

use perm_storage::{MemoryStore, PgPool, PostgresStore, Store};

use crate::auth::{NoopSecurityLogger, SecurityLogger, TokenVerifier};
use crate::grpc::{
    PermissionGrpcService, PermissionServiceServer, RoleGrpcService, RoleServiceServer,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::middleware::{AbortLayer, AuthLayer, RecoveryLayer};

/// Lifecycle state of a [`PermServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted,
    Serving,
    Draining,
    Stopped,
}

/// Errors from starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to start server: {0}")]
    FailedToStart(String),

    #[error("server already started")]
    AlreadyStarted,

    #[error("server is stopped")]
    Stopped,

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Builder for [`PermServer`].
///
/// Without a store or pool the server runs on an in-memory store. Without a
/// verifier calls are not authenticated.
pub struct ServerBuilder {
    store: Option<Arc<dyn Store>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    security_logger: Arc<dyn SecurityLogger>,
    tls_identity: Option<Identity>,
    request_timeout: Duration,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            store: None,
            verifier: None,
            security_logger: Arc::new(NoopSecurityLogger),
            tls_identity: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves an explicit store backend.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Serves a PostgreSQL store on `pool`.
    ///
    /// The pool is used as is: the caller runs
    /// [`PostgresStore::run_migrations`] and [`PostgresStore::check_ready`]
    /// before serving, as the `perm` binary does.
    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.store = Some(Arc::new(PostgresStore::new(pool)));
        self
    }

    /// Requires every call to carry a token accepted by `verifier`.
    pub fn with_token_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_security_logger(mut self, logger: Arc<dyn SecurityLogger>) -> Self {
        self.security_logger = logger;
        self
    }

    /// Serves TLS with the given certificate and key.
    pub fn tls_identity(mut self, identity: Identity) -> Self {
        self.tls_identity = Some(identity);
        self
    }

    /// Bounds each handler's store call.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> PermServer {
        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => MemoryStore::new_shared(),
        };
        let auth = self
            .verifier
            .map(|verifier| AuthLayer::new(verifier, self.security_logger));
        let (state, _) = watch::channel(ServerState::Unstarted);
        let (abort, _) = watch::channel(false);

        PermServer {
            store,
            auth,
            tls_identity: self.tls_identity,
            request_timeout: self.request_timeout,
            state,
            abort,
        }
    }
}

/// The perm gRPC server.
pub struct PermServer {
    store: Arc<dyn Store>,
    auth: Option<AuthLayer>,
    tls_identity: Option<Identity>,
    request_timeout: Duration,
    state: watch::Sender<ServerState>,
    abort: watch::Sender<bool>,
}

impl PermServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Binds `addr` and serves until stopped.
    pub async fn serve_addr(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::FailedToStart(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serves on `listener` until [`graceful_stop`](Self::graceful_stop) or
    /// [`stop`](Self::stop) is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match *state {
            ServerState::Unstarted => {
                *state = ServerState::Serving;
                true
            }
            ServerState::Serving => {
                outcome = Err(ServerError::AlreadyStarted);
                false
            }
            ServerState::Draining | ServerState::Stopped => {
                outcome = Err(ServerError::Stopped);
                false
            }
        });
        outcome?;

        let result = self.run(listener).await;
        self.state.send_replace(ServerState::Stopped);
        info!("perm server stopped");
        result
    }

    async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().ok();

        let mut builder = Server::builder();
        if let Some(identity) = &self.tls_identity {
            builder = builder
                .tls_config(ServerTlsConfig::new().identity(identity.clone()))
                .map_err(|e| ServerError::FailedToStart(format!("invalid TLS identity: {e}")))?;
        }

        let layer = ServiceBuilder::new()
            .layer(RecoveryLayer::new())
            .layer(AbortLayer::new(self.abort.subscribe()))
            .option_layer(self.auth.clone())
            .into_inner();

        let roles =
            RoleGrpcService::with_request_timeout(Arc::clone(&self.store), self.request_timeout);
        let permissions = PermissionGrpcService::with_request_timeout(
            Arc::clone(&self.store),
            self.request_timeout,
        );

        let mut state = self.state.subscribe();
        let drain = async move {
            // Resolves on Draining or Stopped.
            let _ = state.wait_for(|s| *s != ServerState::Serving).await;
            info!("draining in-flight calls");
        };

        let router = builder
            .layer(layer)
            .add_service(RoleServiceServer::new(roles))
            .add_service(PermissionServiceServer::new(permissions));

        info!(
            addr = ?local_addr,
            tls = self.tls_identity.is_some(),
            auth = self.auth.is_some(),
            "perm server listening"
        );

        let mut abort = self.abort.subscribe();
        tokio::select! {
            result = router.serve_with_incoming_shutdown(TcpListenerStream::new(listener), drain) => {
                result.map_err(ServerError::from)
            }
            Ok(_) = abort.wait_for(|aborted| *aborted) => {
                info!("perm server aborted");
                Ok(())
            }
        }
    }

    /// Stops accepting calls and waits for in-flight calls to finish.
    ///
    /// Concurrent callers all return once the server is stopped. On a server
    /// that never started this moves straight to `Stopped`.
    pub async fn graceful_stop(&self) {
        self.state.send_if_modified(|state| match *state {
            ServerState::Unstarted => {
                *state = ServerState::Stopped;
                true
            }
            ServerState::Serving => {
                *state = ServerState::Draining;
                true
            }
            ServerState::Draining | ServerState::Stopped => false,
        });

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }

    /// Stops immediately, aborting in-flight calls.
    pub fn stop(&self) {
        self.abort.send_replace(true);
        self.state.send_if_modified(|state| {
            if *state == ServerState::Stopped {
                false
            } else {
                *state = ServerState::Stopped;
                true
            }
        });
    }
}
