//! Environment variable secret provider.
//!
//! Maps config key paths to environment variable names using the
//! uppercase + underscore convention (`tenants.contoso.client_secret` →
//! `TENANTS_CONTOSO_CLIENT_SECRET`). This is the default provider.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::normalize_key;
use crate::{SecretError, SecretProvider, SecretValue};

/// Secret provider that reads secrets from environment variables.
///
/// Key paths are mapped to env var names via the `mappings` `HashMap`,
/// or by normalizing and uppercasing when no explicit mapping exists.
#[derive(Debug, Default)]
pub struct EnvSecretProvider {
    /// Explicit normalized key → env var name mappings from `SECRET_MAP_*` vars.
    mappings: HashMap<String, String>,
}

impl EnvSecretProvider {
    /// Create a new `EnvSecretProvider` with the given key mappings.
    #[must_use]
    pub fn new(mappings: HashMap<String, String>) -> Self {
        Self { mappings }
    }

    /// Resolve a config key path to an environment variable name.
    fn resolve_env_var_name(&self, name: &str) -> String {
        let key = normalize_key(name);
        match self.mappings.get(&key) {
            Some(mapped) => mapped.clone(),
            None => key.to_uppercase(),
        }
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError> {
        let env_var = self.resolve_env_var_name(name);

        match std::env::var(&env_var) {
            Ok(value) if !value.is_empty() => {
                tracing::debug!(
                    secret_name = name,
                    env_var = %env_var,
                    "Secret loaded from environment variable"
                );
                Ok(SecretValue::new(name, value.into_bytes()))
            }
            // Empty value treated as not found
            _ => Err(SecretError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    fn provider_type(&self) -> &'static str {
        "env"
    }
}
