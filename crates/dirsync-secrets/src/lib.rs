//! Pluggable secret provider abstraction for directory synchronization.
//!
//! Client-credential secrets are referenced from tenant configuration by a
//! config key path (e.g. `tenants.contoso.client_secret`) and resolved through
//! a [`SecretProvider`] once per token renewal. Resolved values never appear
//! in `Debug` output.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dirsync_secrets::{SecretProviderConfig, build_provider};
//!
//! let config = SecretProviderConfig::from_env()?;
//! let provider = build_provider(&config)?;
//! let secret = provider.get_secret("tenants.contoso.client_secret").await?;
//! let clear_text = secret.as_str()?;
//! ```

pub mod config;
pub mod provider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;

pub use config::{ProviderType, SecretProviderConfig};
pub use provider::env::EnvSecretProvider;
pub use provider::file::FileSecretProvider;
pub use provider::memory::StaticSecretProvider;

// ── SecretError ──────────────────────────────────────────────────────────

/// Errors returned by secret provider operations.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// Secret not found in provider.
    #[error("Secret not found: '{name}'")]
    NotFound { name: String },

    /// Provider is unreachable or failed to read.
    #[error("Secret provider '{provider}' unavailable: {detail}")]
    ProviderUnavailable { provider: String, detail: String },

    /// Secret value is malformed (wrong encoding, empty).
    #[error("Invalid secret value for '{name}': {detail}")]
    InvalidValue { name: String, detail: String },

    /// Configuration error (missing required config, invalid path).
    #[error("Secret provider configuration error: {detail}")]
    ConfigError { detail: String },
}

// ── SecretValue ──────────────────────────────────────────────────────────

/// A resolved secret value returned by any provider.
#[derive(Clone)]
pub struct SecretValue {
    /// Config key path the value was resolved from.
    pub name: String,

    /// Raw secret bytes.
    pub value: Vec<u8>,

    /// Timestamp when this value was fetched from the provider.
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValue")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

impl SecretValue {
    /// Create a new SecretValue.
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value,
            loaded_at: Utc::now(),
        }
    }

    /// Interpret the secret value as a UTF-8 string.
    pub fn as_str(&self) -> Result<&str, SecretError> {
        std::str::from_utf8(&self.value).map_err(|e| SecretError::InvalidValue {
            name: self.name.clone(),
            detail: format!("Not valid UTF-8: {e}"),
        })
    }

    /// Copy the value into a [`SecretString`], trimming trailing newlines
    /// left by files and shell exports.
    pub fn to_secret_string(&self) -> Result<SecretString, SecretError> {
        let text = self.as_str()?.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Err(SecretError::InvalidValue {
                name: self.name.clone(),
                detail: "empty value".to_string(),
            });
        }
        Ok(SecretString::from(text.to_string()))
    }
}

// ── SecretProvider Trait ──────────────────────────────────────────────────

/// Trait that all secret providers must implement.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Retrieve a secret by its config key path.
    ///
    /// Returns `SecretError::NotFound` if the secret does not exist in the provider.
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError>;

    /// Return the provider type name for logging/diagnostics.
    fn provider_type(&self) -> &'static str;
}

// ── Provider Factory ─────────────────────────────────────────────────────

/// Build a secret provider based on the given configuration.
pub fn build_provider(
    config: &SecretProviderConfig,
) -> Result<Arc<dyn SecretProvider>, SecretError> {
    let provider: Arc<dyn SecretProvider> = match config.provider_type {
        ProviderType::Env => Arc::new(EnvSecretProvider::new(config.secret_mappings.clone())),
        ProviderType::File => Arc::new(FileSecretProvider::new(config)?),
    };

    tracing::info!(
        provider = provider.provider_type(),
        mappings = config.secret_mappings.len(),
        "Secret provider initialized"
    );

    Ok(provider)
}
