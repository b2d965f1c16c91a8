//! Security audit sink.

/// Target used for audit events emitted through `tracing`.
pub const SECURITY_LOG_TARGET: &str = "perm::security";

/// A key/value pair attached to an audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomExtension {
    pub key: String,
    pub value: String,
}

impl CustomExtension {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Records security-relevant events, separately from application logs.
///
/// `signature` classifies the event and `name` describes it.
pub trait SecurityLogger: Send + Sync + 'static {
    fn log(&self, signature: &str, name: &str, extensions: &[CustomExtension]);
}

/// Emits audit entries as `tracing` events under [`SECURITY_LOG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSecurityLogger;

impl SecurityLogger for TracingSecurityLogger {
    fn log(&self, signature: &str, name: &str, extensions: &[CustomExtension]) {
        let extensions = extensions
            .iter()
            .map(|ext| format!("{}={}", ext.key, ext.value))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            target: SECURITY_LOG_TARGET,
            signature,
            name,
            extensions = %extensions,
            "security event"
        );
    }
}

/// Discards all audit entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSecurityLogger;

impl SecurityLogger for NoopSecurityLogger {
    fn log(&self, _signature: &str, _name: &str, _extensions: &[CustomExtension]) {}
}
