//! Connection settings shared by every backend adapter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConnectorError, ConnectorResult};

/// Connection settings for one tenant's backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connect timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Overall request timeout in seconds (connect + response).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Whether to verify the server certificate.
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connection_timeout() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("dirsync/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            request_timeout_secs: default_request_timeout(),
            verify_certificate: true,
            user_agent: default_user_agent(),
        }
    }
}

impl ConnectionSettings {
    /// Create new connection settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Disable certificate verification (local development only).
    #[must_use]
    pub fn without_certificate_verification(mut self) -> Self {
        self.verify_certificate = false;
        self
    }

    /// Get connect timeout as Duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get request timeout as Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the settings, warning about insecure ones.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.connection_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConnectorError::invalid_configuration(
                "timeouts must be at least one second",
            ));
        }

        if !self.verify_certificate {
            tracing::warn!(
                target: "security",
                "TLS certificate verification is DISABLED; use only for local development"
            );
        }

        Ok(())
    }
}
