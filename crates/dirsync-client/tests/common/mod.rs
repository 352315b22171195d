//! Common test utilities for dirsync-client integration tests.

#![allow(dead_code)]

use dirsync_client::{
    BearerToken, ClientCredentialsConfig, ResourceConfig, StaticTokenSource, SyncConfig,
    SyncOrchestrator, TenantConfig,
};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use wiremock::{Request, Respond, ResponseTemplate};

pub const TENANT: &str = "contoso";
pub const TEST_TOKEN: &str = "mock-access-token";

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Test data factory for creating directory users.
pub fn create_test_user(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "userPrincipalName": format!("{name}@contoso.example"),
        "displayName": format!("Test User {name}"),
        "accountEnabled": true
    })
}

/// Generate a sequence of test users.
pub fn generate_test_users(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| create_test_user(&format!("user-{i}"), &format!("user{i}")))
        .collect()
}

/// Creates a mock OAuth token response.
pub fn create_token_response(access_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// Creates an OData error response.
pub fn create_odata_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// A base URL nothing listens on: connections to it are refused.
pub fn refused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

/// Credentials that mark a tenant as authenticated. The token endpoint is
/// never called when the orchestrator uses a static token source.
pub fn test_auth() -> ClientCredentialsConfig {
    ClientCredentialsConfig::new(
        "http://127.0.0.1:9/token",
        "dirsync-test",
        "tenants.contoso.client_secret",
    )
}

/// Tenant with bearer auth, the given endpoints and a `users` resource.
pub fn tenant_config(endpoints: &[String]) -> TenantConfig {
    TenantConfig::new(endpoints.iter().cloned())
        .with_auth(test_auth())
        .with_resource("users", users_resource())
}

pub fn users_resource() -> ResourceConfig {
    ResourceConfig::new("/users").with_mapping("userName", "userPrincipalName")
}

/// Static source issuing [`TEST_TOKEN`] for [`TENANT`].
pub fn static_tokens() -> Arc<StaticTokenSource> {
    Arc::new(
        StaticTokenSource::new().with_token(TENANT, BearerToken::expiring_in(TEST_TOKEN, 3600)),
    )
}

/// Orchestrator for a single tenant using [`static_tokens`].
pub fn orchestrator(tenant: TenantConfig) -> SyncOrchestrator {
    init_test_logging();
    let config = SyncConfig::new().with_tenant(TENANT, tenant);
    SyncOrchestrator::with_token_source(config, static_tokens()).expect("valid test config")
}

/// Serves a fixed collection in cursor-paged form.
///
/// Honors the `count` query parameter up to `max_page`, continues from a
/// `cursor` of the form `off-<n>`, and reports `nextCursor` while items
/// remain.
pub struct CursorPagedResponder {
    pub items: Vec<Value>,
    pub max_page: usize,
    pub calls: Arc<AtomicUsize>,
}

impl CursorPagedResponder {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            max_page: usize::MAX,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_page(mut self, max_page: usize) -> Self {
        self.max_page = max_page;
        self
    }
}

impl Respond for CursorPagedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut count = 100usize;
        let mut offset = 0usize;
        for (name, value) in request.url.query_pairs() {
            match name.as_ref() {
                "count" => count = value.parse().unwrap_or(100),
                "cursor" => {
                    offset = value.trim_start_matches("off-").parse().unwrap_or(0);
                }
                _ => {}
            }
        }

        let offset = offset.min(self.items.len());
        let end = (offset + count.min(self.max_page)).min(self.items.len());
        let mut body = json!({ "value": self.items[offset..end].to_vec() });
        if end < self.items.len() {
            body["nextCursor"] = json!(format!("off-{end}"));
        }
        ResponseTemplate::new(200).set_body_json(body)
    }
}
