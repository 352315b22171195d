//! File-based secret provider for secret volume mounts.
//!
//! A config key path resolves to an explicit `SECRET_MAP_*` path when one is
//! configured, otherwise to `<SECRET_FILE_DIR>/<normalized key>`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{normalize_key, SecretProviderConfig};
use crate::{SecretError, SecretProvider, SecretValue};

/// Secret provider that reads secrets from filesystem paths.
#[derive(Debug)]
pub struct FileSecretProvider {
    /// Maps normalized key → file path.
    path_mappings: HashMap<String, PathBuf>,
    /// Fallback directory for keys without an explicit mapping.
    base_dir: Option<PathBuf>,
}

impl FileSecretProvider {
    /// Create a new FileSecretProvider from configuration.
    pub fn new(config: &SecretProviderConfig) -> Result<Self, SecretError> {
        let path_mappings: HashMap<String, PathBuf> = config
            .secret_mappings
            .iter()
            .map(|(name, path)| (name.clone(), PathBuf::from(path)))
            .collect();

        if path_mappings.is_empty() && config.file_dir.is_none() {
            return Err(SecretError::ConfigError {
                detail: "file provider needs SECRET_FILE_DIR or at least one SECRET_MAP_* entry"
                    .to_string(),
            });
        }

        Ok(Self {
            path_mappings,
            base_dir: config.file_dir.clone(),
        })
    }

    fn resolve_path(&self, name: &str) -> Option<PathBuf> {
        let key = normalize_key(name);
        self.path_mappings
            .get(&key)
            .cloned()
            .or_else(|| self.base_dir.as_ref().map(|dir| dir.join(&key)))
    }

    /// Check file permissions and warn if world-readable.
    #[cfg(unix)]
    fn check_permissions(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o004 != 0 {
                tracing::warn!(
                    path = %path.display(),
                    mode = format!("{:o}", mode),
                    "Secret file is world-readable. Consider restricting permissions to 0600."
                );
            }
        }
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) {}
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<SecretValue, SecretError> {
        let path = self.resolve_path(name).ok_or_else(|| SecretError::NotFound {
            name: name.to_string(),
        })?;

        Self::check_permissions(&path);

        let contents = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SecretError::NotFound {
                name: name.to_string(),
            },
            _ => SecretError::ProviderUnavailable {
                provider: "file".to_string(),
                detail: format!("Failed to read '{}': {e}", path.display()),
            },
        })?;

        if contents.is_empty() {
            return Err(SecretError::InvalidValue {
                name: name.to_string(),
                detail: format!("Secret file '{}' is empty", path.display()),
            });
        }

        tracing::debug!(
            secret_name = name,
            path = %path.display(),
            "Secret loaded from file"
        );

        Ok(SecretValue::new(name, contents))
    }

    fn provider_type(&self) -> &'static str {
        "file"
    }
}
