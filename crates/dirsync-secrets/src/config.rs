//! Secret provider configuration parsed from environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::SecretError;

/// Which secret provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderType {
    /// Read from environment variables (default).
    #[default]
    Env,
    /// Read from files (e.g. Kubernetes secret volume mounts).
    File,
}

impl ProviderType {
    /// Parse from string value (case-insensitive).
    pub fn from_str_value(s: &str) -> Result<Self, SecretError> {
        match s.to_lowercase().as_str() {
            "env" | "environment" => Ok(Self::Env),
            "file" | "filesystem" => Ok(Self::File),
            other => Err(SecretError::ConfigError {
                detail: format!("Unknown SECRET_PROVIDER value '{other}'. Valid options: env, file"),
            }),
        }
    }
}

/// Complete secret provider configuration.
#[derive(Debug, Clone, Default)]
pub struct SecretProviderConfig {
    /// Which provider to use.
    pub provider_type: ProviderType,
    /// Normalized config key path → provider-specific location
    /// (env var name or file path).
    pub secret_mappings: HashMap<String, String>,
    /// Directory holding one file per secret (file provider only).
    pub file_dir: Option<PathBuf>,
}

impl SecretProviderConfig {
    /// Parse configuration from environment variables.
    ///
    /// Reads:
    /// - `SECRET_PROVIDER`: provider type (default: "env")
    /// - `SECRET_MAP_{NAME}`: explicit secret location mappings
    /// - `SECRET_FILE_DIR`: directory for the file provider
    pub fn from_env() -> Result<Self, SecretError> {
        let provider_type = match env::var("SECRET_PROVIDER") {
            Ok(s) if !s.is_empty() => ProviderType::from_str_value(&s)?,
            _ => ProviderType::Env,
        };

        let file_dir = env::var("SECRET_FILE_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            provider_type,
            secret_mappings: Self::parse_secret_mappings(),
            file_dir,
        })
    }

    /// Parse `SECRET_MAP_*` environment variables into a `HashMap`.
    ///
    /// e.g., `SECRET_MAP_TENANTS_CONTOSO_CLIENT_SECRET=/run/secrets/contoso`
    /// → {"tenants_contoso_client_secret": "/run/secrets/contoso"}
    fn parse_secret_mappings() -> HashMap<String, String> {
        let mut mappings = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix("SECRET_MAP_") {
                mappings.insert(normalize_key(name), value);
            }
        }
        mappings
    }
}

/// Normalize a config key path for mapping lookups: lowercase, with every
/// character outside `[a-z0-9]` replaced by `_`.
#[must_use]
pub fn normalize_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
