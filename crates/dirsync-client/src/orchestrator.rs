//! Per-operation composition of the token cache, cursor store, executor,
//! reconciler and resolver.
//!
//! The orchestrator owns every piece of per-tenant mutable state. Nothing
//! is persisted; state lives as long as the orchestrator.

use dirsync_connector::error::{ConnectorError, ConnectorResult, ProtocolError};
use dirsync_connector::ids::{ResourceType, TenantKey};
use dirsync_connector::mapping::{AttributeMapper, RenameMapper};
use dirsync_connector::operation::{Attributes, ListResponse, PageRequest};
use dirsync_secrets::SecretProvider;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth::{ClientCredentialsSource, TokenCache, TokenSource};
use crate::config::{encode_path_segment, expand_path, AddressBy, ResourceConfig, SyncConfig};
use crate::entitlements::{
    assign_license_body, assignment_state_from_license_details, DisabledPlans,
    EntitlementDelta, EntitlementReconciler, PlanCatalog,
};
use crate::executor::{RequestExecutor, RequestOptions};
use crate::paging::{self, CursorPosition, PagingCursorStore};
use crate::resolver::{DirectoryIdentifierResolver, DirectorySearch, HttpDirectorySearch};
use crate::value_at;

/// An update: changed attributes and/or an entitlement delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    pub attributes: Attributes,
    pub entitlements: Option<EntitlementDelta>,
}

impl UpdateRequest {
    #[must_use]
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            entitlements: None,
        }
    }

    #[must_use]
    pub fn with_entitlements(mut self, delta: EntitlementDelta) -> Self {
        self.entitlements = Some(delta);
        self
    }
}

struct FetchedPage {
    items: Vec<Value>,
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Translate {
    ToStableId,
    ToMutablePath,
}

impl Translate {
    async fn apply<S: DirectorySearch>(
        self,
        resolver: &DirectoryIdentifierResolver<S>,
        value: &str,
    ) -> ConnectorResult<String> {
        match self {
            Self::ToStableId => resolver.to_stable_id(value).await,
            Self::ToMutablePath => resolver.to_mutable_path(value).await,
        }
    }

    /// Translate a string or an array of strings in place.
    ///
    /// Inbound references to objects the directory no longer holds become
    /// null (or are dropped from arrays). Outbound references to unknown
    /// objects are a validation error.
    async fn apply_in_place<S: DirectorySearch>(
        self,
        resolver: &DirectoryIdentifierResolver<S>,
        attribute: &str,
        value: &mut Value,
    ) -> ConnectorResult<()> {
        match value {
            Value::String(s) => {
                *value = match self.resolve(resolver, attribute, s).await? {
                    Some(translated) => Value::String(translated),
                    None => Value::Null,
                };
            }
            Value::Array(items) => {
                let mut translated = Vec::with_capacity(items.len());
                for item in items.drain(..) {
                    match item {
                        Value::String(s) => {
                            if let Some(t) = self.resolve(resolver, attribute, &s).await? {
                                translated.push(Value::String(t));
                            }
                        }
                        other => translated.push(other),
                    }
                }
                *items = translated;
            }
            _ => {}
        }
        Ok(())
    }

    async fn resolve<S: DirectorySearch>(
        self,
        resolver: &DirectoryIdentifierResolver<S>,
        attribute: &str,
        reference: &str,
    ) -> ConnectorResult<Option<String>> {
        match (self, self.apply(resolver, reference).await) {
            (_, Ok(translated)) => Ok(Some(translated)),
            (Self::ToStableId, Err(ConnectorError::NotFound { .. })) => {
                warn!(attribute, reference, "Dropping reference to missing directory object");
                Ok(None)
            }
            (Self::ToMutablePath, Err(ConnectorError::NotFound { .. })) => {
                Err(ConnectorError::validation(format!(
                    "attribute '{attribute}' references unknown object '{reference}'"
                )))
            }
            (_, Err(err)) => Err(err),
        }
    }
}

/// Entry point for enumerate/get/create/update/delete against any tenant.
pub struct SyncOrchestrator {
    config: SyncConfig,
    tokens: Arc<TokenCache>,
    executor: Arc<RequestExecutor>,
    cursors: PagingCursorStore,
    mapper: Arc<dyn AttributeMapper>,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("tenants", &self.config.tenants.len())
            .field("tokens", &self.tokens)
            .field("cursors", &self.cursors.len())
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Build an orchestrator that authenticates with OAuth2 client
    /// credentials, reading client secrets from `secrets`.
    pub fn new(config: SyncConfig, secrets: Arc<dyn SecretProvider>) -> ConnectorResult<Self> {
        let source = ClientCredentialsSource::new(&config, secrets)?;
        Self::with_token_source(config, Arc::new(source))
    }

    /// Build an orchestrator with a custom token source.
    pub fn with_token_source(
        config: SyncConfig,
        source: Arc<dyn TokenSource>,
    ) -> ConnectorResult<Self> {
        config.validate()?;

        let tokens = Arc::new(TokenCache::new(source));
        let executor = Arc::new(RequestExecutor::new(&config, Arc::clone(&tokens))?);

        info!(tenants = config.tenants.len(), "Sync orchestrator initialized");

        Ok(Self {
            config,
            tokens,
            executor,
            cursors: PagingCursorStore::new(),
            mapper: Arc::new(RenameMapper),
        })
    }

    /// Replace the attribute mapper.
    #[must_use]
    pub fn with_mapper(mut self, mapper: Arc<dyn AttributeMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn cursors(&self) -> &PagingCursorStore {
        &self.cursors
    }

    /// The error as reported to the outer provisioning layer.
    #[must_use]
    pub fn protocol_error(err: &ConnectorError) -> ProtocolError {
        ProtocolError::from(err)
    }

    /// Identifier resolver for a tenant's directory.
    pub fn resolver(
        &self,
        tenant: &TenantKey,
    ) -> ConnectorResult<DirectoryIdentifierResolver<HttpDirectorySearch>> {
        let directory = self.config.tenant(tenant)?.directory.clone().ok_or_else(|| {
            ConnectorError::invalid_configuration(format!(
                "tenant {tenant} has no directory lookup configured"
            ))
        })?;
        let search =
            HttpDirectorySearch::new(Arc::clone(&self.executor), tenant.clone(), directory.clone());
        Ok(DirectoryIdentifierResolver::from_config(search, &directory))
    }

    /// Enumerate one page, or every object when `page` is unpaginated.
    #[instrument(skip(self), fields(tenant = %tenant, resource = %resource))]
    pub async fn enumerate(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        page: PageRequest,
    ) -> ConnectorResult<ListResponse> {
        let rc = self.config.resource(tenant, resource)?;

        if !page.is_paginated() {
            return self.enumerate_all(tenant, rc).await;
        }

        let start_index = page.effective_start_index();
        let count = rc.page_size(page.count);

        let cursor = match self.cursors.next(tenant, resource, &page) {
            CursorPosition::Fresh => None,
            CursorPosition::Continue(cursor) => Some(cursor),
            CursorPosition::Exhausted | CursorPosition::OutOfSequence => {
                return Ok(ListResponse::empty(start_index - 1));
            }
        };

        let fetched = match self.fetch_page(tenant, rc, count, cursor.as_deref()).await {
            Ok(fetched) => fetched,
            Err(err) => {
                if let Some(cursor) = cursor {
                    self.cursors.restore(tenant, resource, start_index, cursor);
                }
                return Err(err);
            }
        };

        let page_len = fetched.items.len();
        let has_more = fetched.next_cursor.is_some();
        let resources = match self.to_canonical_all(tenant, rc, fetched.items).await {
            Ok(resources) => resources,
            Err(err) => {
                if let Some(cursor) = cursor {
                    self.cursors.restore(tenant, resource, start_index, cursor);
                }
                return Err(err);
            }
        };

        self.cursors
            .record(tenant, resource, start_index, page_len, fetched.next_cursor);
        let total = paging::total_results(start_index, page_len, has_more);
        debug!(start_index, page_len, has_more, total, "Served page");

        Ok(ListResponse::new(resources, total))
    }

    async fn enumerate_all(
        &self,
        tenant: &TenantKey,
        rc: &ResourceConfig,
    ) -> ConnectorResult<ListResponse> {
        let mut raw = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let fetched = self
                .fetch_page(tenant, rc, rc.default_page_size, cursor.as_deref())
                .await?;
            raw.extend(fetched.items);

            match fetched.next_cursor {
                Some(next) if !seen.insert(next.clone()) => {
                    warn!(cursor = %next, "Backend revisited a continuation marker, stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let resources = self.to_canonical_all(tenant, rc, raw).await?;
        let total = resources.len() as u64;
        info!(total, "Enumerated all objects");
        Ok(ListResponse::new(resources, total))
    }

    async fn fetch_page(
        &self,
        tenant: &TenantKey,
        rc: &ResourceConfig,
        count: u64,
        cursor: Option<&str>,
    ) -> ConnectorResult<FetchedPage> {
        let mut options =
            RequestOptions::new().with_query(rc.page_size_param.clone(), count.to_string());
        if let Some(cursor) = cursor {
            options = options.with_query(rc.cursor_param.clone(), cursor);
        }

        let response = self
            .executor
            .execute(tenant, Method::GET, &rc.path, None, &options)
            .await?;

        let items = match value_at(&response.body, &rc.results_path) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(ConnectorError::serialization(format!(
                    "list results at '{}' are not an array",
                    rc.results_path
                )))
            }
        };

        let next_cursor = value_at(&response.body, &rc.next_cursor_path)
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(FetchedPage { items, next_cursor })
    }

    /// Read one object. Relations whose probe returns 404 are reported as null.
    #[instrument(skip(self), fields(tenant = %tenant, resource = %resource))]
    pub async fn get(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        id: &str,
    ) -> ConnectorResult<Option<Value>> {
        let rc = self.config.resource(tenant, resource)?;

        let address = match self.addressing_id(tenant, rc, id).await {
            Ok(address) => address,
            Err(ConnectorError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        let options = RequestOptions::new();
        let Some(response) = self
            .executor
            .probe(tenant, Method::GET, &object_path(rc, &address), None, &options)
            .await?
        else {
            return Ok(None);
        };

        let mut object = self.to_canonical(tenant, rc, response.body).await?;

        for relation in &rc.relations {
            let path = expand_path(&relation.path, &address);
            let mut value = self
                .executor
                .probe(tenant, Method::GET, &path, None, &options)
                .await?
                .and_then(|related| related.body.get(&relation.value_attribute).cloned())
                .unwrap_or(Value::Null);

            if !value.is_null() && rc.path_valued_attributes.contains(&relation.attribute) {
                let resolver = self.resolver(tenant)?;
                Translate::ToStableId
                    .apply_in_place(&resolver, &relation.attribute, &mut value)
                    .await?;
            }

            if let Some(fields) = object.as_object_mut() {
                fields.insert(relation.attribute.clone(), value);
            }
        }

        Ok(Some(object))
    }

    /// Create an object. A duplicate surfaces as an HTTP 409 error.
    #[instrument(skip(self, attributes), fields(tenant = %tenant, resource = %resource))]
    pub async fn create(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        attributes: &Attributes,
    ) -> ConnectorResult<Value> {
        let rc = self.config.resource(tenant, resource)?;
        let body = Value::Object(self.to_endpoint(tenant, rc, attributes).await?);

        let response = self
            .executor
            .execute(tenant, Method::POST, &rc.path, Some(&body), &RequestOptions::new())
            .await?;

        let created = if response.body.is_object() {
            response.body
        } else {
            body
        };
        let object = self.to_canonical(tenant, rc, created).await?;
        info!(id = ?object.get("id"), "Created object");
        Ok(object)
    }

    /// Update attributes and/or entitlements. Returns `None` if the object
    /// does not exist.
    #[instrument(skip(self, request), fields(tenant = %tenant, resource = %resource))]
    pub async fn update(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        id: &str,
        request: &UpdateRequest,
    ) -> ConnectorResult<Option<Value>> {
        let rc = self.config.resource(tenant, resource)?;
        if let Some(delta) = &request.entitlements {
            delta.validate()?;
        }

        let address = match self.addressing_id(tenant, rc, id).await {
            Ok(address) => address,
            Err(ConnectorError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        if let Some(delta) = request.entitlements.as_ref().filter(|d| !d.is_empty()) {
            self.update_entitlements(tenant, &address, delta).await?;
        }

        if !request.attributes.is_empty() {
            let body = Value::Object(self.to_endpoint(tenant, rc, &request.attributes).await?);
            let response = self
                .executor
                .probe(
                    tenant,
                    rc.update_method.as_method(),
                    &object_path(rc, &address),
                    Some(&body),
                    &RequestOptions::new(),
                )
                .await?;

            match response {
                None => return Ok(None),
                Some(response) if response.body.is_object() => {
                    return self.to_canonical(tenant, rc, response.body).await.map(Some);
                }
                Some(_) => {}
            }
        }

        self.get(tenant, resource, id).await
    }

    /// Delete an object. A missing object is `ConnectorError::NotFound`.
    #[instrument(skip(self), fields(tenant = %tenant, resource = %resource))]
    pub async fn delete(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        id: &str,
    ) -> ConnectorResult<()> {
        let rc = self.config.resource(tenant, resource)?;
        let address = self.addressing_id(tenant, rc, id).await?;

        match self
            .executor
            .execute(
                tenant,
                Method::DELETE,
                &object_path(rc, &address),
                None,
                &RequestOptions::new(),
            )
            .await
        {
            Ok(_) => {
                info!(id = %id, "Deleted object");
                Ok(())
            }
            Err(err) if err.is_benign_absence() => Err(ConnectorError::NotFound {
                identifier: id.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    /// Apply an entitlement delta to one user.
    ///
    /// Fetches the plan catalog and the user's current assignment, reconciles,
    /// and writes the disabled sets when any sku was touched. Returns what was
    /// written.
    #[instrument(skip(self, delta), fields(tenant = %tenant))]
    pub async fn update_entitlements(
        &self,
        tenant: &TenantKey,
        user_id: &str,
        delta: &EntitlementDelta,
    ) -> ConnectorResult<DisabledPlans> {
        delta.validate()?;
        if delta.is_empty() {
            return Ok(DisabledPlans::new());
        }

        let entitlements = self.config.tenant(tenant)?.entitlements.as_ref().ok_or_else(|| {
            ConnectorError::invalid_configuration(format!(
                "tenant {tenant} has no entitlement endpoints configured"
            ))
        })?;
        let options = RequestOptions::new();

        let catalog = self
            .executor
            .execute(tenant, Method::GET, &entitlements.catalog_path, None, &options)
            .await?;
        let catalog = PlanCatalog::from_subscribed_skus(&catalog.body)?;

        let assignments_path = expand_path(&entitlements.assignments_path, user_id);
        let current = self
            .executor
            .execute(tenant, Method::GET, &assignments_path, None, &options)
            .await?;
        let current = assignment_state_from_license_details(&current.body)?;

        let disabled =
            EntitlementReconciler::reconcile(&current, &catalog, &delta.add, &delta.remove)?;

        if disabled.is_empty() {
            info!("No sku touched, nothing to write");
            return Ok(disabled);
        }

        let body = assign_license_body(&disabled);
        self.executor
            .execute(
                tenant,
                Method::POST,
                &expand_path(&entitlements.assign_path, user_id),
                Some(&body),
                &options,
            )
            .await?;

        info!(skus = disabled.len(), "Wrote entitlement assignment");
        Ok(disabled)
    }

    async fn addressing_id(
        &self,
        tenant: &TenantKey,
        rc: &ResourceConfig,
        id: &str,
    ) -> ConnectorResult<String> {
        match rc.address_by {
            AddressBy::StableId => Ok(id.to_string()),
            AddressBy::MutablePath => self.resolver(tenant)?.to_mutable_path(id).await,
        }
    }

    async fn to_canonical(
        &self,
        tenant: &TenantKey,
        rc: &ResourceConfig,
        raw: Value,
    ) -> ConnectorResult<Value> {
        let mut canonical = self.mapper.inbound(&raw, &rc.attribute_map);

        if let Some(fields) = canonical.as_object_mut() {
            if let Some(id) = raw.get(&rc.id_attribute) {
                fields.insert("id".to_string(), id.clone());
            }

            if !rc.path_valued_attributes.is_empty() {
                let resolver = self.resolver(tenant)?;
                for attribute in &rc.path_valued_attributes {
                    if let Some(value) = fields.get_mut(attribute) {
                        Translate::ToStableId
                            .apply_in_place(&resolver, attribute, value)
                            .await?;
                    }
                }
            }
        }

        Ok(canonical)
    }

    async fn to_canonical_all(
        &self,
        tenant: &TenantKey,
        rc: &ResourceConfig,
        raw: Vec<Value>,
    ) -> ConnectorResult<Vec<Value>> {
        let mut resources = Vec::with_capacity(raw.len());
        for item in raw {
            resources.push(self.to_canonical(tenant, rc, item).await?);
        }
        Ok(resources)
    }

    async fn to_endpoint(
        &self,
        tenant: &TenantKey,
        rc: &ResourceConfig,
        attributes: &Attributes,
    ) -> ConnectorResult<Attributes> {
        let mut canonical = attributes.clone();

        if !rc.path_valued_attributes.is_empty() {
            let resolver = self.resolver(tenant)?;
            for attribute in &rc.path_valued_attributes {
                if let Some(value) = canonical.get_mut(attribute) {
                    Translate::ToMutablePath
                        .apply_in_place(&resolver, attribute, value)
                        .await?;
                }
            }
        }

        Ok(self.mapper.outbound(&canonical, &rc.attribute_map))
    }
}

fn object_path(rc: &ResourceConfig, address: &str) -> String {
    format!(
        "{}/{}",
        rc.path.trim_end_matches('/'),
        encode_path_segment(address)
    )
}
