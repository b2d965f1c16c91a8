//! perm server binary
//!
//! Role-based authorization service over gRPC.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! perm --config config.yaml
//!
//! # With environment variables only
//! PERM_STORAGE__BACKEND=memory perm
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tonic::transport::Identity;
use tracing::{error, info};

use perm_api::auth::{parse_algorithm, JwtVerifier, TokenVerifier, TracingSecurityLogger};
use perm_api::observability::{init_logging, LoggingConfig};
use perm_api::{PermServer, ServerBuilder};
use perm_server::{AuthSettings, ServerConfig, StorageSettings, TlsSettings};
use perm_storage::{MemoryStore, PostgresConfig, PostgresStore, Store};

/// perm - role-based authorization service
#[derive(Parser, Debug)]
#[command(name = "perm")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::from_env()?,
    };

    init_logging(LoggingConfig::from(&config.logging));
    info!(version = env!("CARGO_PKG_VERSION"), "Starting perm server");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;

    let mut builder = PermServer::builder()
        .with_store(create_store(&config.storage).await?)
        .request_timeout(Duration::from_secs(config.server.request_timeout_secs));

    if let Some(verifier) = create_verifier(&config.auth)? {
        info!(issuer = %config.auth.issuer, "token authentication enabled");
        builder = builder
            .with_token_verifier(verifier)
            .with_security_logger(Arc::new(TracingSecurityLogger));
    }

    if let Some(identity) = load_tls_identity(&config.tls)? {
        builder = builder.tls_identity(identity);
    }

    run(builder, addr).await
}

async fn run(builder: ServerBuilder, addr: SocketAddr) -> anyhow::Result<()> {
    let server = Arc::new(builder.build());

    let serving = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { serving.serve_addr(addr).await });

    tokio::select! {
        result = &mut handle => {
            let result = result.context("server task panicked")?;
            if let Err(ref e) = result {
                error!("gRPC server error: {}", e);
            }
            return result.map_err(Into::into);
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining in-flight calls");
        }
    }

    server.graceful_stop().await;
    handle.await.context("server task panicked")??;
    info!("Shutdown complete");
    Ok(())
}

async fn create_store(settings: &StorageSettings) -> anyhow::Result<Arc<dyn Store>> {
    match settings.backend.as_str() {
        "memory" => {
            info!("Using in-memory storage backend");
            Ok(MemoryStore::new_shared())
        }
        "postgres" => {
            let database_url = settings
                .database_url
                .clone()
                .context("storage.database_url is required for postgres backend")?;

            info!("Connecting to PostgreSQL database");
            let pg_config = PostgresConfig {
                database_url,
                max_connections: settings.pool_size,
                min_connections: 1,
                connect_timeout_secs: settings.connection_timeout_secs,
                query_timeout_secs: settings.query_timeout_secs,
                ..Default::default()
            };
            let store = PostgresStore::from_config(&pg_config).await?;

            info!("Running database migrations");
            store.run_migrations().await?;
            store.check_ready().await?;
            info!("Database migrations complete");

            Ok(Arc::new(store))
        }
        other => anyhow::bail!("Unknown storage backend: {}", other),
    }
}

fn create_verifier(settings: &AuthSettings) -> anyhow::Result<Option<Arc<dyn TokenVerifier>>> {
    if !settings.enabled {
        return Ok(None);
    }

    let algorithm = parse_algorithm(&settings.algorithm)?;
    let verifier = match (&settings.secret, &settings.public_key_path) {
        (Some(secret), _) if settings.algorithm.to_uppercase().starts_with("HS") => {
            JwtVerifier::with_secret(algorithm, secret.as_bytes(), &settings.issuer)?
        }
        (_, Some(path)) => {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read auth public key {path}"))?;
            JwtVerifier::with_public_key_pem(algorithm, &pem, &settings.issuer)?
        }
        _ => anyhow::bail!("auth is enabled but no key material is configured"),
    };

    Ok(Some(Arc::new(
        verifier
            .with_audience(&settings.audience)
            .with_leeway(settings.leeway_secs),
    )))
}

fn load_tls_identity(settings: &TlsSettings) -> anyhow::Result<Option<Identity>> {
    match (&settings.cert_path, &settings.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert = std::fs::read(cert_path)
                .with_context(|| format!("failed to read TLS certificate {cert_path}"))?;
            let key = std::fs::read(key_path)
                .with_context(|| format!("failed to read TLS key {key_path}"))?;
            info!("TLS enabled");
            Ok(Some(Identity::from_pem(cert, key)))
        }
        _ => Ok(None),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perm_storage::RoleRepo;

    #[test]
    fn test_cli_args_parsing() {
        let args = Args::try_parse_from(["perm"]).unwrap();
        assert!(args.config.is_none());

        let args = Args::try_parse_from(["perm", "--config", "config.yaml"]).unwrap();
        assert_eq!(args.config, Some("config.yaml".to_string()));

        let args = Args::try_parse_from(["perm", "-c", "test.yaml"]).unwrap();
        assert_eq!(args.config, Some("test.yaml".to_string()));
    }

    #[test]
    fn test_create_verifier_disabled() {
        assert!(create_verifier(&AuthSettings::default()).unwrap().is_none());
    }

    #[test]
    fn test_create_verifier_with_secret() {
        let settings = AuthSettings {
            enabled: true,
            issuer: "http://localhost:6789".to_string(),
            algorithm: "HS256".to_string(),
            secret: Some("tokensecret".to_string()),
            ..Default::default()
        };
        assert!(create_verifier(&settings).unwrap().is_some());
    }

    #[test]
    fn test_create_verifier_missing_key_file() {
        let settings = AuthSettings {
            enabled: true,
            issuer: "http://localhost:6789".to_string(),
            algorithm: "RS256".to_string(),
            public_key_path: Some("/nonexistent/uaa.pem".to_string()),
            ..Default::default()
        };
        let err = create_verifier(&settings).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/uaa.pem"));
    }

    #[test]
    fn test_tls_identity_requires_both_paths() {
        assert!(load_tls_identity(&TlsSettings::default()).unwrap().is_none());

        let settings = TlsSettings {
            cert_path: Some("/nonexistent/tls.crt".to_string()),
            key_path: Some("/nonexistent/tls.key".to_string()),
        };
        assert!(load_tls_identity(&settings).is_err());
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(&StorageSettings::default()).await.unwrap();
        let roles = store
            .list_actor_roles(&perm_storage::Actor::new("A", "ns1"))
            .await
            .unwrap();
        assert!(roles.is_empty());
    }
}
