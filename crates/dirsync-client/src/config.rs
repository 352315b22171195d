//! Tenant and resource configuration for the synchronization client.
//!
//! Configuration is plain serde data. Secrets are never stored here: the
//! client credential is referenced by a config key path and resolved through
//! a [`dirsync_secrets::SecretProvider`] on every token renewal.

use dirsync_connector::config::ConnectionSettings;
use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::ids::{ResourceType, TenantKey};
use dirsync_connector::mapping::AttributeMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Configuration for every tenant the client serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub tenants: HashMap<TenantKey, TenantConfig>,
}

impl SyncConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<TenantKey>, config: TenantConfig) -> Self {
        self.tenants.insert(tenant.into(), config);
        self
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(value: serde_json::Value) -> ConnectorResult<Self> {
        let config: Self = serde_json::from_value(value).map_err(|e| {
            ConnectorError::invalid_configuration(format!("malformed configuration: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every tenant.
    pub fn validate(&self) -> ConnectorResult<()> {
        for (tenant, config) in &self.tenants {
            config.validate().map_err(|e| match e {
                ConnectorError::InvalidConfiguration { message } => {
                    ConnectorError::invalid_configuration(format!("tenant {tenant}: {message}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Look up a tenant.
    pub fn tenant(&self, tenant: &TenantKey) -> ConnectorResult<&TenantConfig> {
        self.tenants
            .get(tenant)
            .ok_or_else(|| ConnectorError::UnknownTenant {
                tenant: tenant.clone(),
            })
    }

    /// Look up a resource type of a tenant.
    pub fn resource(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
    ) -> ConnectorResult<&ResourceConfig> {
        self.tenant(tenant)?
            .resources
            .get(resource)
            .ok_or_else(|| ConnectorError::UnknownResource {
                tenant: tenant.clone(),
                resource: resource.clone(),
            })
    }
}

/// One tenant's backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Ordered endpoint base URLs. The first is tried first; later ones are
    /// failover targets.
    pub endpoints: Vec<String>,

    /// Client-credentials settings. Tenants without them send no bearer token.
    #[serde(default)]
    pub auth: Option<ClientCredentialsConfig>,

    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub resources: HashMap<ResourceType, ResourceConfig>,

    #[serde(default)]
    pub entitlements: Option<EntitlementConfig>,

    #[serde(default)]
    pub directory: Option<DirectoryConfig>,
}

impl TenantConfig {
    /// Create a tenant with the given endpoints and defaults everywhere else.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            auth: None,
            connection: ConnectionSettings::default(),
            resources: HashMap::new(),
            entitlements: None,
            directory: None,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: ClientCredentialsConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<ResourceType>, config: ResourceConfig) -> Self {
        self.resources.insert(resource.into(), config);
        self
    }

    #[must_use]
    pub fn with_entitlements(mut self, entitlements: EntitlementConfig) -> Self {
        self.entitlements = Some(entitlements);
        self
    }

    #[must_use]
    pub fn with_directory(mut self, directory: DirectoryConfig) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Parse the endpoint list.
    pub fn endpoint_urls(&self) -> ConnectorResult<Vec<Url>> {
        self.endpoints
            .iter()
            .map(|raw| {
                let url = Url::parse(raw).map_err(|e| {
                    ConnectorError::invalid_configuration(format!("invalid endpoint '{raw}': {e}"))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConnectorError::invalid_configuration(format!(
                        "endpoint '{raw}' must use http or https"
                    )));
                }
                Ok(url)
            })
            .collect()
    }

    /// Validate endpoints, credentials and resources.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.endpoints.is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "at least one endpoint is required",
            ));
        }
        self.endpoint_urls()?;
        self.connection.validate()?;

        if let Some(auth) = &self.auth {
            auth.validate()?;
        }

        for (name, resource) in &self.resources {
            resource.validate(name)?;
            if resource.needs_directory() && self.directory.is_none() {
                return Err(ConnectorError::invalid_configuration(format!(
                    "resource '{name}' addresses objects by path or has path-valued \
                     attributes but no directory lookup is configured"
                )));
            }
        }

        Ok(())
    }
}

/// OAuth2 client-credentials settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentialsConfig {
    pub token_url: String,
    pub client_id: String,
    /// Config key path of the client secret in the secret provider.
    pub client_secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ClientCredentialsConfig {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret_key: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret_key: client_secret_key.into(),
            scope: None,
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        Url::parse(&self.token_url).map_err(|e| {
            ConnectorError::invalid_configuration(format!(
                "invalid token_url '{}': {e}",
                self.token_url
            ))
        })?;
        if self.client_id.is_empty() {
            return Err(ConnectorError::invalid_configuration("client_id is required"));
        }
        if self.client_secret_key.is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "client_secret_key is required",
            ));
        }
        Ok(())
    }
}

/// How objects of a resource type are addressed in endpoint paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressBy {
    /// The canonical id is used directly.
    #[default]
    StableId,
    /// The canonical id is translated to the mutable path first.
    MutablePath,
}

/// HTTP method used for attribute updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateMethod {
    #[default]
    Patch,
    Put,
}

impl UpdateMethod {
    #[must_use]
    pub fn as_method(&self) -> reqwest::Method {
        match self {
            Self::Patch => reqwest::Method::PATCH,
            Self::Put => reqwest::Method::PUT,
        }
    }
}

/// A related object fetched with a secondary probe (e.g. `manager`).
///
/// A 404 from the probe means the relation is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Canonical attribute the relation is reported under.
    pub attribute: String,
    /// Path template; `{id}` is replaced by the object's addressing id.
    pub path: String,
    /// Attribute of the probed object holding the reference.
    #[serde(default = "default_id_attribute")]
    pub value_attribute: String,
}

impl RelationConfig {
    pub fn new(attribute: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            path: path.into(),
            value_attribute: default_id_attribute(),
        }
    }

    #[must_use]
    pub fn with_value_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.value_attribute = attribute.into();
        self
    }
}

/// One resource type of a tenant's backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Collection path relative to the endpoint base (e.g. `/users`).
    pub path: String,

    /// Endpoint attribute carrying the canonical id.
    #[serde(default = "default_id_attribute")]
    pub id_attribute: String,

    /// Key or dotted path of the result array in a list response.
    #[serde(default = "default_results_path")]
    pub results_path: String,

    /// Key or dotted path of the continuation marker in a list response.
    #[serde(default = "default_next_cursor_path")]
    pub next_cursor_path: String,

    /// Query parameter carrying the continuation marker.
    #[serde(default = "default_cursor_param")]
    pub cursor_param: String,

    /// Query parameter carrying the page size.
    #[serde(default = "default_page_size_param")]
    pub page_size_param: String,

    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,

    #[serde(default)]
    pub update_method: UpdateMethod,

    #[serde(default)]
    pub attribute_map: AttributeMap,

    #[serde(default)]
    pub address_by: AddressBy,

    /// Canonical attributes whose values are stable ids on the canonical
    /// side and mutable paths on the endpoint side.
    #[serde(default)]
    pub path_valued_attributes: Vec<String>,

    #[serde(default)]
    pub relations: Vec<RelationConfig>,
}

fn default_id_attribute() -> String {
    "id".to_string()
}

fn default_results_path() -> String {
    "value".to_string()
}

fn default_next_cursor_path() -> String {
    "nextCursor".to_string()
}

fn default_cursor_param() -> String {
    "cursor".to_string()
}

fn default_page_size_param() -> String {
    "count".to_string()
}

fn default_page_size() -> u64 {
    100
}

fn default_max_page_size() -> u64 {
    1000
}

impl ResourceConfig {
    /// Create a resource at `path` with default paging and mapping settings.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id_attribute: default_id_attribute(),
            results_path: default_results_path(),
            next_cursor_path: default_next_cursor_path(),
            cursor_param: default_cursor_param(),
            page_size_param: default_page_size_param(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            update_method: UpdateMethod::default(),
            attribute_map: AttributeMap::new(),
            address_by: AddressBy::default(),
            path_valued_attributes: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    #[must_use]
    pub fn with_page_sizes(mut self, default_page_size: u64, max_page_size: u64) -> Self {
        self.default_page_size = default_page_size;
        self.max_page_size = max_page_size;
        self
    }

    #[must_use]
    pub fn with_update_method(mut self, method: UpdateMethod) -> Self {
        self.update_method = method;
        self
    }

    #[must_use]
    pub fn with_mapping(mut self, canonical: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.attribute_map.insert(canonical.into(), endpoint.into());
        self
    }

    #[must_use]
    pub fn with_address_by(mut self, address_by: AddressBy) -> Self {
        self.address_by = address_by;
        self
    }

    #[must_use]
    pub fn with_path_valued_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.path_valued_attributes.push(attribute.into());
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: RelationConfig) -> Self {
        self.relations.push(relation);
        self
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    #[must_use]
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    /// Whether this resource needs directory identifier translation.
    #[must_use]
    pub fn needs_directory(&self) -> bool {
        self.address_by == AddressBy::MutablePath || !self.path_valued_attributes.is_empty()
    }

    fn validate(&self, name: &ResourceType) -> ConnectorResult<()> {
        if !self.path.starts_with('/') {
            return Err(ConnectorError::invalid_configuration(format!(
                "resource '{name}' path must start with '/'"
            )));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(ConnectorError::invalid_configuration(format!(
                "resource '{name}' page sizes must be positive"
            )));
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConnectorError::invalid_configuration(format!(
                "resource '{name}' default_page_size exceeds max_page_size"
            )));
        }
        Ok(())
    }
}

/// Entitlement (license plan) endpoints.
///
/// Paths are templates; `{id}` is replaced by the user's addressing id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementConfig {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_assignments_path")]
    pub assignments_path: String,
    #[serde(default = "default_assign_path")]
    pub assign_path: String,
}

fn default_catalog_path() -> String {
    "/subscribedSkus".to_string()
}

fn default_assignments_path() -> String {
    "/users/{id}/licenseDetails".to_string()
}

fn default_assign_path() -> String {
    "/users/{id}/assignLicense".to_string()
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            assignments_path: default_assignments_path(),
            assign_path: default_assign_path(),
        }
    }
}

/// Directory search used to translate between stable ids and mutable paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_search_path")]
    pub search_path: String,
    #[serde(default = "default_filter_param")]
    pub filter_param: String,
    #[serde(default = "default_results_path")]
    pub results_path: String,
    #[serde(default = "default_stable_id_attribute")]
    pub stable_id_attribute: String,
    #[serde(default = "default_path_attribute")]
    pub path_attribute: String,
}

fn default_search_path() -> String {
    "/directoryObjects".to_string()
}

fn default_filter_param() -> String {
    "filter".to_string()
}

fn default_stable_id_attribute() -> String {
    "objectGUID".to_string()
}

fn default_path_attribute() -> String {
    "distinguishedName".to_string()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            search_path: default_search_path(),
            filter_param: default_filter_param(),
            results_path: default_results_path(),
            stable_id_attribute: default_stable_id_attribute(),
            path_attribute: default_path_attribute(),
        }
    }
}

/// Substitute a percent-encoded id into a `{id}` path template.
#[must_use]
pub fn expand_path(template: &str, id: &str) -> String {
    template.replace("{id}", &encode_path_segment(id))
}

/// Percent-encode one path segment.
///
/// Directory paths carry commas, equals signs and spaces, none of which may
/// reach the URL unescaped.
#[must_use]
pub fn encode_path_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant_json() -> serde_json::Value {
        json!({
            "tenants": {
                "contoso": {
                    "endpoints": ["https://dir1.contoso.test/api", "https://dir2.contoso.test/api"],
                    "auth": {
                        "token_url": "https://login.contoso.test/token",
                        "client_id": "sync-client",
                        "client_secret_key": "tenants.contoso.client_secret"
                    },
                    "resources": {
                        "users": {
                            "path": "/users",
                            "attribute_map": {"userName": "userPrincipalName"}
                        }
                    },
                    "entitlements": {}
                }
            }
        })
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let config = SyncConfig::from_json(tenant_json()).unwrap();
        let tenant = config.tenant(&TenantKey::new("contoso")).unwrap();

        assert_eq!(tenant.endpoint_urls().unwrap().len(), 2);
        assert_eq!(tenant.connection.request_timeout_secs, 60);

        let users = config
            .resource(&TenantKey::new("contoso"), &ResourceType::users())
            .unwrap();
        assert_eq!(users.id_attribute, "id");
        assert_eq!(users.results_path, "value");
        assert_eq!(users.default_page_size, 100);
        assert_eq!(users.update_method, UpdateMethod::Patch);
        assert_eq!(users.address_by, AddressBy::StableId);
        assert_eq!(users.attribute_map["userName"], "userPrincipalName");

        let entitlements = tenant.entitlements.as_ref().unwrap();
        assert_eq!(entitlements.catalog_path, "/subscribedSkus");
    }

    #[test]
    fn test_unknown_tenant_and_resource() {
        let config = SyncConfig::from_json(tenant_json()).unwrap();
        let err = config.tenant(&TenantKey::new("fabrikam")).unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownTenant { .. }));

        let err = config
            .resource(&TenantKey::new("contoso"), &ResourceType::groups())
            .unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownResource { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let config = SyncConfig::new().with_tenant("a", TenantConfig::new(Vec::<String>::new()));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tenant a"));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let tenant = TenantConfig::new(["ftp://dir.test"]);
        assert!(tenant.validate().is_err());
    }

    #[test]
    fn test_validate_requires_directory_for_path_addressing() {
        let tenant = TenantConfig::new(["https://dir.test"]).with_resource(
            "users",
            ResourceConfig::new("/users").with_address_by(AddressBy::MutablePath),
        );
        assert!(tenant.validate().is_err());

        let tenant = tenant.with_directory(DirectoryConfig::default());
        assert!(tenant.validate().is_ok());
    }

    #[test]
    fn test_validate_page_sizes() {
        let tenant = TenantConfig::new(["https://dir.test"])
            .with_resource("users", ResourceConfig::new("/users").with_page_sizes(500, 100));
        assert!(tenant.validate().is_err());
    }

    #[test]
    fn test_page_size_clamp() {
        let resource = ResourceConfig::new("/users").with_page_sizes(100, 1000);
        assert_eq!(resource.page_size(None), 100);
        assert_eq!(resource.page_size(Some(0)), 1);
        assert_eq!(resource.page_size(Some(250)), 250);
        assert_eq!(resource.page_size(Some(5000)), 1000);
    }

    #[test]
    fn test_encode_path_segment() {
        assert_eq!(
            encode_path_segment("CN=Ada Lovelace,OU=Staff"),
            "CN%3DAda%20Lovelace%2COU%3DStaff"
        );
        assert_eq!(encode_path_segment("a+b"), "a%2Bb");
        assert_eq!(expand_path("/users/{id}/licenseDetails", "u 1"), "/users/u%201/licenseDetails");
    }

    #[test]
    fn test_update_method_serde() {
        let method: UpdateMethod = serde_json::from_value(json!("PUT")).unwrap();
        assert_eq!(method, UpdateMethod::Put);
        assert_eq!(method.as_method(), reqwest::Method::PUT);
    }
}
