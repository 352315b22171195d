//! Directory synchronization client
//!
//! The machinery shared by every directory backend adapter:
//!
//! - [`auth`] - Per-tenant bearer-token cache with single-flight renewal
//! - [`paging`] - Index-based paging over opaque backend cursors
//! - [`executor`] - HTTP execution with sticky multi-endpoint failover
//! - [`entitlements`] - License plan delta → per-sku disabled sets
//! - [`resolver`] - Stable id ↔ mutable path translation
//! - [`orchestrator`] - Enumerate/get/create/update/delete composed from the above
//!
//! # Example
//!
//! ```no_run
//! use dirsync_client::{SyncConfig, SyncOrchestrator};
//! use dirsync_connector::prelude::*;
//! use dirsync_secrets::{build_provider, SecretProviderConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_json(serde_json::json!({
//!     "tenants": {
//!         "contoso": {
//!             "endpoints": ["https://dir1.contoso.example/api", "https://dir2.contoso.example/api"],
//!             "auth": {
//!                 "token_url": "https://login.contoso.example/token",
//!                 "client_id": "dirsync",
//!                 "client_secret_key": "tenants.contoso.client_secret"
//!             },
//!             "resources": { "users": { "path": "/users" } }
//!         }
//!     }
//! }))?;
//!
//! let secrets = build_provider(&SecretProviderConfig::from_env()?)?;
//! let orchestrator = SyncOrchestrator::new(config, secrets)?;
//!
//! let page = orchestrator
//!     .enumerate(&TenantKey::new("contoso"), &ResourceType::users(), PageRequest::new(1, 100))
//!     .await?;
//! println!("{} of {}", page.len(), page.total_results);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod entitlements;
pub mod executor;
pub mod orchestrator;
pub mod paging;
pub mod resolver;

use serde_json::Value;

// Re-exports
pub use auth::{BearerToken, ClientCredentialsSource, StaticTokenSource, TokenCache, TokenSource};
pub use config::{
    AddressBy, ClientCredentialsConfig, DirectoryConfig, EntitlementConfig, RelationConfig,
    ResourceConfig, SyncConfig, TenantConfig, UpdateMethod,
};
pub use entitlements::{
    DisabledPlans, EntitlementDelta, EntitlementReconciler, PlanCatalog, PlanCatalogEntry,
    PlanReference,
};
pub use executor::{HttpResponse, RequestExecutor, RequestOptions, RequestTarget};
pub use orchestrator::{SyncOrchestrator, UpdateRequest};
pub use paging::{CursorPosition, PagingCursorStore, SENTINEL_TOTAL_RESULTS};
pub use resolver::{DirectoryIdentifierResolver, DirectorySearch, HttpDirectorySearch};

/// Look up `path` in a response body: an empty path is the body itself, a
/// literal top-level key wins (`@odata.nextLink`), otherwise dots separate
/// nested keys (`meta.next`).
pub(crate) fn value_at<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(body);
    }
    if let Some(value) = body.get(path) {
        return Some(value);
    }
    let pointer = format!("/{}", path.replace('.', "/"));
    body.pointer(&pointer)
}
