//! Authenticated HTTP execution with ordered endpoint failover.
//!
//! Each tenant has an ordered list of endpoint base URLs. A request is tried
//! against the current endpoint first; if that endpoint cannot be reached at
//! all (refused, unresolved, timed out) the next one is tried, wrapping
//! around, until every endpoint has been tried once. The endpoint that
//! answers becomes the tenant's current endpoint. HTTP error statuses never
//! trigger failover.

use dirsync_connector::error::{ConnectorError, ConnectorResult, TransportCode};
use dirsync_connector::ids::{RequestId, TenantKey};
use reqwest::header::ACCEPT;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as _;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn, Span};
use url::Url;

use crate::auth::TokenCache;
use crate::config::{SyncConfig, TenantConfig};

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Where a request is sent.
#[derive(Clone, Default)]
pub enum RequestTarget {
    /// The tenant's endpoint list, with the tenant's bearer token.
    #[default]
    TenantDefault,
    /// A fixed base URL outside the tenant's endpoint list. Tenant
    /// authentication is bypassed; the optional bearer is sent instead.
    Absolute {
        url: Url,
        bearer: Option<SecretString>,
    },
}

impl fmt::Debug for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TenantDefault => f.write_str("TenantDefault"),
            Self::Absolute { url, bearer } => f
                .debug_struct("Absolute")
                .field("url", &url.as_str())
                .field("bearer", &bearer.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub target: RequestTarget,
    pub query: Vec<(String, String)>,
    /// Overrides the tenant's request timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send to `url` instead of the tenant's endpoints.
    #[must_use]
    pub fn absolute(url: Url) -> Self {
        Self {
            target: RequestTarget::Absolute { url, bearer: None },
            ..Self::default()
        }
    }

    /// Bearer for an absolute target. Ignored for the tenant default target.
    #[must_use]
    pub fn with_bearer(mut self, token: SecretString) -> Self {
        if let RequestTarget::Absolute { bearer, .. } = &mut self.target {
            *bearer = Some(token);
        }
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successful response. Empty bodies are returned as `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// One tenant's endpoints, HTTP client and current endpoint index.
pub struct TenantConnection {
    tenant: TenantKey,
    endpoints: Vec<Url>,
    active: AtomicUsize,
    authenticated: bool,
    http_client: reqwest::Client,
}

impl fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConnection")
            .field("tenant", &self.tenant)
            .field("endpoints", &self.endpoints.iter().map(Url::as_str).collect::<Vec<_>>())
            .field("active", &self.active.load(Ordering::SeqCst))
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

impl TenantConnection {
    /// Build the connection for one tenant.
    pub fn new(tenant: TenantKey, config: &TenantConfig) -> ConnectorResult<Self> {
        let endpoints = config.endpoint_urls()?;
        if endpoints.is_empty() {
            return Err(ConnectorError::invalid_configuration(format!(
                "tenant {tenant} has no endpoints"
            )));
        }

        let settings = &config.connection;
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.connection_timeout())
            .timeout(settings.request_timeout())
            .user_agent(settings.user_agent.clone())
            .danger_accept_invalid_certs(!settings.verify_certificate)
            .build()
            .map_err(|e| {
                ConnectorError::invalid_configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            tenant,
            endpoints,
            active: AtomicUsize::new(0),
            authenticated: config.auth.is_some(),
            http_client,
        })
    }

    /// The endpoint the next request goes to first.
    #[must_use]
    pub fn active_endpoint(&self) -> &Url {
        &self.endpoints[self.active_index()]
    }

    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst) % self.endpoints.len()
    }

    #[must_use]
    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }
}

/// Executes requests for every configured tenant.
#[derive(Debug)]
pub struct RequestExecutor {
    tokens: Arc<TokenCache>,
    connections: HashMap<TenantKey, TenantConnection>,
}

impl RequestExecutor {
    /// Build connections for every tenant in `config`.
    pub fn new(config: &SyncConfig, tokens: Arc<TokenCache>) -> ConnectorResult<Self> {
        let connections = config
            .tenants
            .iter()
            .map(|(tenant, tenant_config)| {
                TenantConnection::new(tenant.clone(), tenant_config)
                    .map(|connection| (tenant.clone(), connection))
            })
            .collect::<ConnectorResult<_>>()?;

        Ok(Self {
            tokens,
            connections,
        })
    }

    pub fn connection(&self, tenant: &TenantKey) -> ConnectorResult<&TenantConnection> {
        self.connections
            .get(tenant)
            .ok_or_else(|| ConnectorError::UnknownTenant {
                tenant: tenant.clone(),
            })
    }

    #[must_use]
    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Execute one request. Non-2xx statuses are returned as
    /// `ConnectorError::Http`.
    #[instrument(
        skip(self, body, options),
        fields(tenant = %tenant, method = %method, path = %path, request_id = tracing::field::Empty)
    )]
    pub async fn execute(
        &self,
        tenant: &TenantKey,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> ConnectorResult<HttpResponse> {
        let connection = self.connection(tenant)?;
        let request_id = RequestId::new();
        Span::current().record("request_id", tracing::field::display(request_id));

        match &options.target {
            RequestTarget::Absolute { url, bearer } => {
                let url = join_path(url, path)?;
                let bearer = bearer.as_ref().map(|b| b.expose_secret().to_string());
                let response = send(
                    connection,
                    method,
                    url,
                    body,
                    bearer.as_deref(),
                    options,
                    request_id,
                )
                .await?;
                self.finish(connection, response, false).await
            }
            RequestTarget::TenantDefault => {
                let token = if connection.authenticated {
                    Some(self.tokens.get_token(tenant).await?)
                } else {
                    None
                };
                let bearer = token.as_ref().map(|t| t.expose());

                let response = self
                    .send_with_failover(connection, method, path, body, bearer, options, request_id)
                    .await?;
                self.finish(connection, response, connection.authenticated)
                    .await
            }
        }
    }

    /// Like [`execute`](Self::execute), but a 404 is reported as `Ok(None)`.
    pub async fn probe(
        &self,
        tenant: &TenantKey,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> ConnectorResult<Option<HttpResponse>> {
        match self.execute(tenant, method, path, body, options).await {
            Ok(response) => Ok(Some(response)),
            Err(err) if err.is_benign_absence() => {
                debug!(tenant = %tenant, path = %path, "Probe target absent");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_with_failover(
        &self,
        connection: &TenantConnection,
        method: Method,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
        options: &RequestOptions,
        request_id: RequestId,
    ) -> ConnectorResult<reqwest::Response> {
        let count = connection.endpoints.len();
        let start = connection.active_index();
        let mut last_error: Option<ConnectorError> = None;

        for attempt in 0..count {
            let index = (start + attempt) % count;
            let endpoint = &connection.endpoints[index];
            let url = join_path(endpoint, path)?;

            match send(
                connection,
                method.clone(),
                url,
                body,
                bearer,
                options,
                request_id,
            )
            .await
            {
                Ok(response) => {
                    if index != start {
                        connection.active.store(index, Ordering::SeqCst);
                        info!(
                            tenant = %connection.tenant,
                            endpoint = %endpoint,
                            attempts = attempt + 1,
                            "Failed over to endpoint"
                        );
                    }
                    return Ok(response);
                }
                Err(err) if err.is_failover_candidate() => {
                    warn!(
                        tenant = %connection.tenant,
                        endpoint = %endpoint,
                        attempt = attempt + 1,
                        of = count,
                        error = %err,
                        "Endpoint unreachable"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(ConnectorError::ServiceUnavailable {
            attempts: count,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn finish(
        &self,
        connection: &TenantConnection,
        response: reqwest::Response,
        tenant_authenticated: bool,
    ) -> ConnectorResult<HttpResponse> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ConnectorError::transport_with_source(
                transport_code(&e),
                format!("failed to read response body: {e}"),
                e,
            )
        })?;

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED && tenant_authenticated {
                self.tokens.invalidate(&connection.tenant).await;
            }
            return Err(ConnectorError::http(
                status.as_u16(),
                error_message(status.as_u16(), &text),
            ));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            body,
        })
    }
}

async fn send(
    connection: &TenantConnection,
    method: Method,
    url: Url,
    body: Option<&Value>,
    bearer: Option<&str>,
    options: &RequestOptions,
    request_id: RequestId,
) -> ConnectorResult<reqwest::Response> {
    debug!(url = %url, "Sending request");

    let mut request = connection
        .http_client
        .request(method, url)
        .header(ACCEPT, "application/json")
        .header(REQUEST_ID_HEADER, request_id.to_string());

    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    if !options.query.is_empty() {
        request = request.query(&options.query);
    }
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }
    if let Some(body) = body {
        request = request.json(body);
    }

    request.send().await.map_err(|e| {
        let code = transport_code(&e);
        ConnectorError::transport_with_source(code, e.to_string(), e)
    })
}

/// Append `path` to an endpoint base URL, keeping the base's own path.
fn join_path(base: &Url, path: &str) -> ConnectorResult<Url> {
    if path.is_empty() {
        return Ok(base.clone());
    }
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| ConnectorError::validation(format!("invalid request path '{path}': {e}")))
}

/// Classify a reqwest failure by walking its source chain.
fn transport_code(err: &reqwest::Error) -> TransportCode {
    if err.is_timeout() {
        return TransportCode::TimedOut;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return TransportCode::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return TransportCode::TimedOut,
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => return TransportCode::ConnectionReset,
                _ => {}
            }
        }
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
        {
            return TransportCode::Unresolved;
        }
        source = cause.source();
    }

    if err.is_connect() {
        TransportCode::ConnectionRefused
    } else {
        TransportCode::Other
    }
}

/// Extract a human-readable message from an error body.
///
/// Understands OData (`error.message`), SCIM (`detail`) and plain `message`
/// bodies; anything else is passed through as text.
fn error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("detail"))
            .or_else(|| value.get("message"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        trimmed.to_string()
    }
}
