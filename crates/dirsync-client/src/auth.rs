//! Bearer-token acquisition and the per-tenant token cache.
//!
//! The cache serves tokens from memory until they come within the safety
//! margin of expiry. Renewal is single-flight per tenant: concurrent callers
//! that find the token stale queue behind one renewal and share its result,
//! success or failure.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::ids::TenantKey;
use dirsync_secrets::SecretProvider;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientCredentialsConfig, SyncConfig};

/// Tokens are renewed once they are this close to expiry.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 30;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// A bearer token and its absolute expiry.
#[derive(Clone)]
pub struct BearerToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
        }
    }

    /// Token that expires `expires_in_secs` from now.
    pub fn expiring_in(value: impl Into<String>, expires_in_secs: i64) -> Self {
        Self::new(value, Utc::now() + Duration::seconds(expires_in_secs))
    }

    /// The clear-text token, for the `Authorization` header only.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the token is expired or will expire within `margin`.
    #[must_use]
    pub fn is_expired_within(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of fresh bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Acquire a new token for `tenant`.
    async fn fetch_token(&self, tenant: &TenantKey) -> ConnectorResult<BearerToken>;
}

/// OAuth2 token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth2 client-credentials grant against each tenant's token endpoint.
///
/// The client secret is read from the secret provider on every renewal and
/// dropped once the request is sent.
pub struct ClientCredentialsSource {
    http_client: reqwest::Client,
    credentials: HashMap<TenantKey, ClientCredentialsConfig>,
    secrets: Arc<dyn SecretProvider>,
}

impl fmt::Debug for ClientCredentialsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsSource")
            .field("tenants", &self.credentials.keys().collect::<Vec<_>>())
            .field("secret_provider", &self.secrets.provider_type())
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsSource {
    /// Build a source covering every tenant that has `auth` configured.
    pub fn new(config: &SyncConfig, secrets: Arc<dyn SecretProvider>) -> ConnectorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                ConnectorError::invalid_configuration(format!("failed to create HTTP client: {e}"))
            })?;

        let credentials = config
            .tenants
            .iter()
            .filter_map(|(tenant, tenant_config)| {
                tenant_config
                    .auth
                    .clone()
                    .map(|auth| (tenant.clone(), auth))
            })
            .collect();

        Ok(Self {
            http_client,
            credentials,
            secrets,
        })
    }

    async fn client_secret(&self, key: &str) -> ConnectorResult<SecretString> {
        let value = self
            .secrets
            .get_secret(key)
            .await
            .map_err(|e| ConnectorError::auth(format!("client secret unavailable: {e}")))?;
        value
            .to_secret_string()
            .map_err(|e| ConnectorError::auth(format!("client secret unusable: {e}")))
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    #[instrument(skip(self), fields(tenant = %tenant))]
    async fn fetch_token(&self, tenant: &TenantKey) -> ConnectorResult<BearerToken> {
        let credentials = self.credentials.get(tenant).ok_or_else(|| {
            ConnectorError::auth(format!("tenant {tenant} has no client credentials configured"))
        })?;

        let secret = self.client_secret(&credentials.client_secret_key).await?;

        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", secret.expose_secret()),
        ];
        if let Some(scope) = credentials.scope.as_deref() {
            params.push(("scope", scope));
        }

        let response = self
            .http_client
            .post(&credentials.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ConnectorError::auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::auth(format!(
                "token request failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::auth(format!("failed to parse token response: {e}")))?;

        let token = BearerToken::expiring_in(
            token_response.access_token,
            token_response
                .expires_in
                .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        );

        debug!(
            "Acquired new token, expires at {}",
            token.expires_at().format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(token)
    }
}

/// Fixed, pre-issued tokens per tenant.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenSource {
    tokens: HashMap<TenantKey, BearerToken>,
}

impl StaticTokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, tenant: impl Into<TenantKey>, token: BearerToken) -> Self {
        self.tokens.insert(tenant.into(), token);
        self
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self, tenant: &TenantKey) -> ConnectorResult<BearerToken> {
        self.tokens
            .get(tenant)
            .cloned()
            .ok_or_else(|| ConnectorError::auth(format!("no token issued for tenant {tenant}")))
    }
}

#[derive(Debug, Default)]
struct SlotState {
    token: Option<BearerToken>,
    /// Incremented after every renewal attempt.
    generation: u64,
    /// Message of the most recent renewal failure, cleared on success.
    last_failure: Option<String>,
}

#[derive(Debug, Default)]
struct TokenSlot {
    state: RwLock<SlotState>,
    renewal: Mutex<()>,
}

/// Per-tenant bearer-token cache with single-flight renewal.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    slots: DashMap<TenantKey, Arc<TokenSlot>>,
    safety_margin: Duration,
    renewals: AtomicU64,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("tenants", &self.slots.len())
            .field("safety_margin", &self.safety_margin)
            .field("renewals", &self.renewal_count())
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            slots: DashMap::new(),
            safety_margin: Duration::seconds(EXPIRY_SAFETY_MARGIN_SECS),
            renewals: AtomicU64::new(0),
        }
    }

    /// Number of renewal attempts made since creation.
    #[must_use]
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    fn slot(&self, tenant: &TenantKey) -> Arc<TokenSlot> {
        self.slots.entry(tenant.clone()).or_default().value().clone()
    }

    /// Gets a valid token for `tenant`, renewing it if necessary.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn get_token(&self, tenant: &TenantKey) -> ConnectorResult<BearerToken> {
        let slot = self.slot(tenant);

        let observed_generation = {
            let state = slot.state.read().await;
            if let Some(token) = state.token.as_ref() {
                if !token.is_expired_within(self.safety_margin) {
                    debug!("Using cached token");
                    return Ok(token.clone());
                }
            }
            state.generation
        };

        let _renewal = slot.renewal.lock().await;

        {
            let state = slot.state.read().await;
            if state.generation != observed_generation {
                // Another caller renewed while we queued: share its outcome.
                if let Some(message) = &state.last_failure {
                    return Err(ConnectorError::auth(message.clone()));
                }
                if let Some(token) = state.token.as_ref() {
                    return Ok(token.clone());
                }
            } else if let Some(token) = state.token.as_ref() {
                if !token.is_expired_within(self.safety_margin) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Renewing bearer token");
        self.renewals.fetch_add(1, Ordering::SeqCst);
        let result = self.source.fetch_token(tenant).await;

        let mut state = slot.state.write().await;
        state.generation += 1;
        match result {
            Ok(token) => {
                state.token = Some(token.clone());
                state.last_failure = None;
                Ok(token)
            }
            Err(err) => {
                let message = match err {
                    ConnectorError::Auth { message } => message,
                    other => other.to_string(),
                };
                warn!(error = %message, "Token renewal failed");
                state.token = None;
                state.last_failure = Some(message.clone());
                Err(ConnectorError::auth(message))
            }
        }
    }

    /// Drops the cached token for `tenant`, forcing a renewal on next use.
    pub async fn invalidate(&self, tenant: &TenantKey) {
        let slot = self.slots.get(tenant).map(|s| Arc::clone(s.value()));
        if let Some(slot) = slot {
            let mut state = slot.state.write().await;
            state.token = None;
            debug!(tenant = %tenant, "Invalidated cached token");
        }
    }
}
