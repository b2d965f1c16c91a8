//! perm-server: Server configuration
//!
//! Loads [`ServerConfig`] from defaults, an optional YAML file and
//! `PERM_`-prefixed environment variables.

pub mod config;

// Re-exports for convenience
pub use config::{
    AuthSettings, ConfigLoadError, LoggingSettings, ServerConfig, ServerSettings, StorageSettings,
    TlsSettings,
};
