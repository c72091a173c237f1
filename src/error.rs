use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "namespaces.api.ttl_secs", "redis_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., the command or key involved)
    pub details: Option<String>,
    /// Source of the error (e.g., "redis", "settings")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the cache layer.
///
/// Most service operations never surface these: distributed-tier failures are
/// absorbed by the local fallback. They appear on the adapter seam
/// ([`crate::cache::RemoteStore`]), in configuration loading, and when a
/// caller-supplied value cannot be serialized.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Distributed tier error: {message}{}", format_context(.context))]
    Backend {
        message: String,
        context: ErrorContext,
    },

    /// The distributed tier answered but refused the command (wrong type,
    /// non-integer counter). Says nothing about connectivity.
    #[error("Distributed tier rejected command: {message}{}", format_context(.context))]
    Rejected {
        message: String,
        context: ErrorContext,
    },

    #[error("Distributed tier timed out after {elapsed_ms}ms{}", format_context(.context))]
    Timeout {
        elapsed_ms: u64,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML syntax error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new distributed-tier error with structured context
    pub fn backend_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Backend {
            message: msg.into(),
            context,
        }
    }

    /// Create a new command-rejection error with structured context
    pub fn rejected_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Rejected {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Whether this error came from the distributed tier (connectivity, rejection or timeout).
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Error::Backend { .. } | Error::Rejected { .. } | Error::Timeout { .. }
        )
    }

    /// Whether the distributed tier could not be reached or did not answer in time.
    /// Only these errors count against backend health.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Backend { .. } | Error::Timeout { .. })
    }

    /// Whether the distributed tier answered but refused the command.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Backend { context, .. }
            | Error::Rejected { context, .. }
            | Error::Timeout { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        use deadpool_redis::redis::ErrorKind;

        let context = ErrorContext::new()
            .with_source("redis")
            .with_details(format!("{:?}", e.kind()));
        let unreachable = e.is_io_error()
            || e.is_timeout()
            || e.is_connection_dropped()
            || e.is_connection_refusal()
            || matches!(
                e.kind(),
                ErrorKind::AuthenticationFailed
                    | ErrorKind::BusyLoadingError
                    | ErrorKind::TryAgain
                    | ErrorKind::ClusterDown
                    | ErrorKind::MasterDown
            );
        if unreachable {
            Error::backend_with_context(e.to_string(), context)
        } else {
            Error::rejected_with_context(e.to_string(), context)
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Error::backend_with_context(
            e.to_string(),
            ErrorContext::new().with_source("redis_pool"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_rendered_in_display() {
        let err = Error::configuration_with_context(
            "ttl must be positive",
            ErrorContext::new()
                .with_field_path("namespaces.api.ttl_secs")
                .with_source("settings"),
        );
        let msg = err.to_string();
        assert!(msg.contains("ttl must be positive"));
        assert!(msg.contains("field: namespaces.api.ttl_secs"));
        assert!(msg.contains("source: settings"));
    }

    #[test]
    fn test_backend_classification() {
        let err = Error::backend_with_context("connection reset", ErrorContext::new());
        assert!(err.is_backend());
        let timeout = Error::Timeout {
            elapsed_ms: 2000,
            context: ErrorContext::new(),
        };
        assert!(timeout.is_backend());
        assert!(timeout.context().is_some());

        assert!(err.is_connectivity());
        assert!(timeout.is_connectivity());

        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(!io.is_backend());
        assert!(io.context().is_none());
    }

    #[test]
    fn test_rejection_is_not_connectivity() {
        let err = Error::rejected_with_context(
            "value is not an integer or out of range",
            ErrorContext::new().with_source("redis"),
        );
        assert!(err.is_backend());
        assert!(err.is_rejected());
        assert!(!err.is_connectivity());
    }

    #[test]
    fn test_redis_reply_errors_are_rejections() {
        use deadpool_redis::redis::{ErrorKind, RedisError};

        let reply: Error = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "value is not an integer or out of range".to_string(),
        ))
        .into();
        assert!(reply.is_rejected());

        let io: Error = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ))
        .into();
        assert!(io.is_connectivity());
    }
}
