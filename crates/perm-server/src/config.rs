//! Configuration management for the perm server.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use perm_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PERM";

/// Supported storage backends.
pub const STORAGE_BACKENDS: [&str; 2] = ["memory", "postgres"];

/// Supported token signing algorithms.
pub const AUTH_ALGORITHMS: [&str; 8] = [
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384",
];

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Token verification settings
    #[serde(default)]
    pub auth: AuthSettings,

    /// Transport security settings
    #[serde(default)]
    pub tls: TlsSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Server network settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on a single call, including its store query
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6283
}

fn default_request_timeout() -> u64 {
    30
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type: "memory" or "postgres"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database connection URL (required if backend is "postgres")
    pub database_url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Per-query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    30
}

/// Token verification settings.
///
/// When enabled, every call must carry a signed token under the `token`
/// metadata key.
///
/// # Example YAML Configuration
///
/// ```yaml
/// auth:
///   enabled: true
///   issuer: https://uaa.example.com/oauth/token
///   audience: perm
///   algorithm: RS256
///   public_key_path: /etc/perm/uaa.pem
/// ```
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct AuthSettings {
    /// Require authenticated calls
    #[serde(default)]
    pub enabled: bool,

    /// Expected `iss` claim
    #[serde(default)]
    pub issuer: String,

    /// Expected `aud` entry; empty disables the audience check
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Signing algorithm
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Shared secret for HS* algorithms
    pub secret: Option<String>,

    /// PEM public key for RS*/ES* algorithms
    pub public_key_path: Option<String>,

    /// Clock skew tolerance for `exp`/`nbf`
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

// Custom Debug implementation to hide the shared secret
impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("enabled", &self.enabled)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("public_key_path", &self.public_key_path)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer: String::new(),
            audience: default_audience(),
            algorithm: default_algorithm(),
            secret: None,
            public_key_path: None,
            leeway_secs: default_leeway(),
        }
    }
}

fn default_audience() -> String {
    "perm".to_string()
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

fn default_leeway() -> u64 {
    60
}

/// TLS settings. Both paths must be set to enable TLS.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TlsSettings {
    /// PEM certificate chain
    pub cert_path: Option<String>,

    /// PEM private key
    pub key_path: Option<String>,
}

impl TlsSettings {
    pub fn is_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn invalid(message: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        message: message.into(),
    }
}

fn environment() -> Environment {
    // Use __ as separator for nested keys: PERM_SERVER__PORT -> server.port
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `PERM_` and use `__` as separator.
    /// For example:
    /// - `PERM_SERVER__PORT=9090` overrides `server.port`
    /// - `PERM_STORAGE__DATABASE_URL=...` overrides `storage.database_url`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.port == 0 {
            return Err(invalid("server.port must be greater than 0"));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(invalid("server.request_timeout_secs must be greater than 0"));
        }

        if !STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            return Err(invalid(format!(
                "storage.backend must be one of: {:?}, got: {}",
                STORAGE_BACKENDS, self.storage.backend
            )));
        }

        if self.storage.backend == "postgres"
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(invalid(
                "storage.database_url is required when backend is 'postgres'",
            ));
        }

        self.validate_auth()?;

        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            return Err(invalid(
                "tls.cert_path and tls.key_path must be set together",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    fn validate_auth(&self) -> Result<(), ConfigLoadError> {
        let auth = &self.auth;
        if !auth.enabled {
            return Ok(());
        }

        if auth.issuer.trim().is_empty() {
            return Err(invalid("auth.issuer is required when auth is enabled"));
        }

        let algorithm = auth.algorithm.to_uppercase();
        if !AUTH_ALGORITHMS.contains(&algorithm.as_str()) {
            return Err(invalid(format!(
                "auth.algorithm must be one of: {:?}, got: {}",
                AUTH_ALGORITHMS, auth.algorithm
            )));
        }

        if algorithm.starts_with("HS") {
            if auth.secret.as_deref().map_or(true, str::is_empty) {
                return Err(invalid(format!(
                    "auth.secret is required for algorithm {algorithm}"
                )));
            }
        } else if auth.public_key_path.as_deref().map_or(true, str::is_empty) {
            return Err(invalid(format!(
                "auth.public_key_path is required for algorithm {algorithm}"
            )));
        }

        Ok(())
    }
}
