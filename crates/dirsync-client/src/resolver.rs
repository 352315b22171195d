//! Stable-id ↔ mutable-path translation for directory objects.
//!
//! Some backends store references to other objects by a path that changes
//! when the object is renamed or moved (a distinguished name, say), while
//! the canonical model refers to objects by an id that never changes. The
//! resolver translates in both directions with a single exact-match lookup
//! and refuses to guess when the lookup does not return exactly one object.

use async_trait::async_trait;
use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::ids::TenantKey;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::DirectoryConfig;
use crate::executor::{RequestExecutor, RequestOptions};
use crate::value_at;

/// Exact-match directory search.
#[async_trait]
pub trait DirectorySearch: Send + Sync {
    /// Every directory object whose `attribute` equals `value`.
    async fn search_exact(&self, attribute: &str, value: &str) -> ConnectorResult<Vec<Value>>;
}

/// Escape a value for use inside a double-quoted filter literal.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Directory search over a tenant's HTTP endpoint: `GET search_path` with
/// `filter=attr eq "value"`.
#[derive(Debug, Clone)]
pub struct HttpDirectorySearch {
    executor: Arc<RequestExecutor>,
    tenant: TenantKey,
    config: DirectoryConfig,
}

impl HttpDirectorySearch {
    pub fn new(executor: Arc<RequestExecutor>, tenant: TenantKey, config: DirectoryConfig) -> Self {
        Self {
            executor,
            tenant,
            config,
        }
    }
}

#[async_trait]
impl DirectorySearch for HttpDirectorySearch {
    async fn search_exact(&self, attribute: &str, value: &str) -> ConnectorResult<Vec<Value>> {
        let filter = format!("{attribute} eq \"{}\"", escape_filter_value(value));
        let options = RequestOptions::new().with_query(self.config.filter_param.clone(), filter);

        let response = self
            .executor
            .execute(
                &self.tenant,
                Method::GET,
                &self.config.search_path,
                None,
                &options,
            )
            .await?;

        match value_at(&response.body, &self.config.results_path) {
            Some(Value::Array(entries)) => Ok(entries.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(ConnectorError::serialization(format!(
                "directory search results at '{}' are not an array",
                self.config.results_path
            ))),
        }
    }
}

/// First string value of `attribute`, unwrapping single-element arrays
/// (multi-valued directory attributes).
fn attribute_string<'a>(entry: &'a Value, attribute: &str) -> Option<&'a str> {
    match entry.get(attribute)? {
        Value::String(s) => Some(s),
        Value::Array(values) => values.first().and_then(Value::as_str),
        _ => None,
    }
}

/// Translates between stable ids and mutable paths.
#[derive(Debug, Clone)]
pub struct DirectoryIdentifierResolver<S> {
    search: S,
    stable_id_attribute: String,
    path_attribute: String,
}

impl<S: DirectorySearch> DirectoryIdentifierResolver<S> {
    pub fn new(
        search: S,
        stable_id_attribute: impl Into<String>,
        path_attribute: impl Into<String>,
    ) -> Self {
        Self {
            search,
            stable_id_attribute: stable_id_attribute.into(),
            path_attribute: path_attribute.into(),
        }
    }

    pub fn from_config(search: S, config: &DirectoryConfig) -> Self {
        Self::new(
            search,
            config.stable_id_attribute.clone(),
            config.path_attribute.clone(),
        )
    }

    /// Mutable path → stable id.
    #[instrument(skip(self))]
    pub async fn to_stable_id(&self, mutable_path: &str) -> ConnectorResult<String> {
        self.lookup(&self.path_attribute, mutable_path, &self.stable_id_attribute)
            .await
    }

    /// Stable id → mutable path.
    #[instrument(skip(self))]
    pub async fn to_mutable_path(&self, stable_id: &str) -> ConnectorResult<String> {
        self.lookup(&self.stable_id_attribute, stable_id, &self.path_attribute)
            .await
    }

    async fn lookup(&self, by: &str, value: &str, wanted: &str) -> ConnectorResult<String> {
        let identifier = format!("{by}={value}");

        // Entries that echo the search attribute must match it exactly
        // (ignoring ASCII case, as directory paths compare).
        let mut matches: Vec<Value> = self
            .search
            .search_exact(by, value)
            .await?
            .into_iter()
            .filter(|entry| {
                attribute_string(entry, by).map_or(true, |found| found.eq_ignore_ascii_case(value))
            })
            .collect();

        match matches.len() {
            0 => Err(ConnectorError::NotFound { identifier }),
            1 => {
                let entry = matches.remove(0);
                let resolved = attribute_string(&entry, wanted).ok_or_else(|| {
                    ConnectorError::serialization(format!(
                        "directory entry for {identifier} has no '{wanted}' attribute"
                    ))
                })?;
                debug!(identifier = %identifier, resolved = %resolved, "Resolved identifier");
                Ok(resolved.to_string())
            }
            n => Err(ConnectorError::Ambiguous {
                identifier,
                matches: n,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedSearch(Vec<Value>);

    #[async_trait]
    impl DirectorySearch for FixedSearch {
        async fn search_exact(&self, _attribute: &str, _value: &str) -> ConnectorResult<Vec<Value>> {
            Ok(self.0.clone())
        }
    }

    fn resolver(entries: Vec<Value>) -> DirectoryIdentifierResolver<FixedSearch> {
        DirectoryIdentifierResolver::new(FixedSearch(entries), "objectGUID", "distinguishedName")
    }

    fn ada() -> Value {
        json!({"objectGUID": "guid-ada", "distinguishedName": "CN=Ada,OU=Staff,DC=example,DC=com"})
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_filter_value("CN=Ada,OU=Staff"), "CN=Ada,OU=Staff");
    }

    #[tokio::test]
    async fn test_single_match_resolves_both_ways() {
        let resolver = resolver(vec![ada()]);

        assert_eq!(
            resolver
                .to_stable_id("cn=ada,ou=staff,dc=example,dc=com")
                .await
                .unwrap(),
            "guid-ada"
        );
        assert_eq!(
            resolver.to_mutable_path("guid-ada").await.unwrap(),
            "CN=Ada,OU=Staff,DC=example,DC=com"
        );
    }

    #[tokio::test]
    async fn test_zero_matches_is_not_found() {
        let err = resolver(vec![]).to_stable_id("CN=Nobody").await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_multiple_matches_is_ambiguous() {
        let first = json!({"distinguishedName": "CN=Ada,OU=Staff"});
        let second = json!({"distinguishedName": "CN=Ada,OU=Contractors"});
        let err = resolver(vec![first, second])
            .to_mutable_path("guid-ada")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Ambiguous { matches: 2, .. }));
    }

    #[tokio::test]
    async fn test_non_exact_results_are_discarded() {
        // A backend returning a prefix match must not produce a guess.
        let prefix = json!({"objectGUID": "guid-adam", "distinguishedName": "CN=Adam,OU=Staff"});
        let err = resolver(vec![prefix]).to_stable_id("CN=Ada,OU=Staff").await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_wanted_attribute() {
        let err = resolver(vec![json!({"distinguishedName": "CN=Ada"})])
            .to_stable_id("CN=Ada")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_multi_valued_attribute() {
        let entry = json!({"objectGUID": ["guid-ada"], "distinguishedName": ["CN=Ada"]});
        assert_eq!(resolver(vec![entry]).to_stable_id("CN=Ada").await.unwrap(), "guid-ada");
    }
}
