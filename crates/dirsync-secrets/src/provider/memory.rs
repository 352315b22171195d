//! In-memory secret provider.
//!
//! Holds secrets handed over programmatically, e.g. by an embedding
//! application that already owns a vault client.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

use crate::config::normalize_key;
use crate::{SecretError, SecretProvider, SecretValue};

/// Secret provider backed by a fixed map of values.
#[derive(Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, SecretString>,
}

impl std::fmt::Debug for StaticSecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecretProvider")
            .field("keys", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticSecretProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret under the given config key path.
    #[must_use]
    pub fn with_secret(mut self, name: &str, value: impl Into<String>) -> Self {
        self.secrets
            .insert(normalize_key(name), SecretString::from(value.into()));
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError> {
        self.secrets
            .get(&normalize_key(name))
            .map(|secret| SecretValue::new(name, secret.expose_secret().as_bytes().to_vec()))
            .ok_or_else(|| SecretError::NotFound {
                name: name.to_string(),
            })
    }

    fn provider_type(&self) -> &'static str {
        "static"
    }
}
