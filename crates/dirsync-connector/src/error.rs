//! Directory synchronization error types
//!
//! Error definitions with a stable kind per variant, transient/permanent
//! classification for failover, and translation to protocol-level status.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::ids::{ResourceType, TenantKey};

/// Connection-level failure code carried by [`ConnectorError::Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportCode {
    /// The endpoint actively refused the connection.
    ConnectionRefused,
    /// The endpoint host name could not be resolved.
    Unresolved,
    /// Connecting or waiting for the response exceeded the timeout.
    TimedOut,
    /// The connection was reset mid-exchange.
    ConnectionReset,
    /// Any other failure below the HTTP layer.
    Other,
}

impl TransportCode {
    /// Stable code string, in the spirit of the OS error names.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCode::ConnectionRefused => "ECONNREFUSED",
            TransportCode::Unresolved => "ENOTFOUND",
            TransportCode::TimedOut => "ETIMEDOUT",
            TransportCode::ConnectionReset => "ECONNRESET",
            TransportCode::Other => "ETRANSPORT",
        }
    }

    /// Whether trying the next endpoint in the list can help.
    #[must_use]
    pub fn allows_failover(&self) -> bool {
        matches!(
            self,
            TransportCode::ConnectionRefused | TransportCode::Unresolved | TransportCode::TimedOut
        )
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error that can occur during directory synchronization.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connection errors (retried via failover)
    /// Connection-level failure talking to one endpoint.
    #[error("transport error {code}: {message}")]
    Transport {
        code: TransportCode,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every configured endpoint failed at the transport level.
    #[error("service unavailable after {attempts} endpoint attempt(s)")]
    ServiceUnavailable { attempts: usize, last_error: String },

    // Backend responses
    /// The backend answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // Caller input
    /// Malformed input, surfaced immediately and never retried.
    #[error("validation failed: {message}")]
    Validation { message: String },

    // Identifier resolution
    /// No directory object matched.
    #[error("object not found: {identifier}")]
    NotFound { identifier: String },

    /// More than one directory object matched.
    #[error("identifier '{identifier}' is ambiguous ({matches} matches)")]
    Ambiguous { identifier: String, matches: usize },

    // Credentials
    /// Token renewal failed.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    // Configuration
    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// No configuration is registered for the tenant.
    #[error("unknown tenant: {tenant}")]
    UnknownTenant { tenant: TenantKey },

    /// The tenant has no configuration for the resource type.
    #[error("tenant {tenant} has no resource type '{resource}'")]
    UnknownResource {
        tenant: TenantKey,
        resource: ResourceType,
    },

    /// A backend payload could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

/// Stable classification of a [`ConnectorError`] for the outer layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    ServiceUnavailable,
    Http,
    Conflict,
    NotFound,
    Ambiguous,
    Validation,
    Auth,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Stable string form of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Http => "http",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConnectorError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Transport { .. } => ErrorKind::Transport,
            ConnectorError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            ConnectorError::Http { status: 409, .. } => ErrorKind::Conflict,
            ConnectorError::Http { status: 404, .. } | ConnectorError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            ConnectorError::Http { .. } => ErrorKind::Http,
            ConnectorError::Ambiguous { .. } => ErrorKind::Ambiguous,
            ConnectorError::Validation { .. } => ErrorKind::Validation,
            ConnectorError::Auth { .. } => ErrorKind::Auth,
            ConnectorError::InvalidConfiguration { .. }
            | ConnectorError::UnknownTenant { .. }
            | ConnectorError::UnknownResource { .. } => ErrorKind::Configuration,
            ConnectorError::Serialization { .. } => ErrorKind::Internal,
        }
    }

    /// Status code the outer provisioning protocol should report.
    pub fn protocol_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Conflict | ErrorKind::Ambiguous => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 401,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::Transport => 502,
            ErrorKind::Http => match self {
                ConnectorError::Http { status, .. } if (400..500).contains(status) => *status,
                _ => 502,
            },
            ErrorKind::Configuration | ErrorKind::Internal => 500,
        }
    }

    /// Check if this error is transient and the operation may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transport { .. } | ConnectorError::ServiceUnavailable { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Whether the request should be retried against the next endpoint.
    pub fn is_failover_candidate(&self) -> bool {
        matches!(self, ConnectorError::Transport { code, .. } if code.allows_failover())
    }

    /// Whether the caller may treat this error as "the object is absent".
    pub fn is_benign_absence(&self) -> bool {
        matches!(self, ConnectorError::Http { status: 404, .. })
    }

    // Convenience constructors

    /// Create a transport error.
    pub fn transport(code: TransportCode, message: impl Into<String>) -> Self {
        ConnectorError::Transport {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source.
    pub fn transport_with_source(
        code: TransportCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Transport {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ConnectorError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ConnectorError::Validation {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        ConnectorError::Auth {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        ConnectorError::Serialization {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::serialization(e.to_string())
    }
}

/// Result type for directory synchronization operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Error as reported to the outer provisioning layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolError {
    /// Protocol status code (e.g. 409 for a duplicate key).
    pub status: u16,
    /// Stable error kind.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub detail: String,
}

impl From<&ConnectorError> for ProtocolError {
    fn from(err: &ConnectorError) -> Self {
        Self {
            status: err.protocol_status(),
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

impl From<ConnectorError> for ProtocolError {
    fn from(err: ConnectorError) -> Self {
        Self::from(&err)
    }
}
