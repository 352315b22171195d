//! Index-based paging over cursor-based backends.
//!
//! Callers page with 1-based start indices. Backends page with opaque
//! continuation markers. The store remembers, per (tenant, resource type),
//! the marker that continues the last page served and the start index the
//! caller must send to use it. Each stored marker is consumed by the next
//! request: a matching request continues the enumeration, any other request
//! resets it.

use dashmap::DashMap;
use dirsync_connector::ids::{ResourceType, TenantKey};
use dirsync_connector::operation::PageRequest;
use tracing::{debug, warn};

/// `totalResults` reported while a continuation marker remains.
///
/// Larger than any index a caller will reach, so index-based clients keep
/// requesting pages until the final page reports the real total.
pub const SENTINEL_TOTAL_RESULTS: u64 = i32::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CursorState {
    /// A page was served and the backend has more.
    Pending {
        expected_start_index: u64,
        cursor: String,
    },
    /// The final page was served.
    Exhausted { next_start_index: u64 },
}

/// Where a page request falls relative to the stored cursor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorPosition {
    /// Start index absent or ≤ 1: begin a new enumeration.
    Fresh,
    /// The request continues the enumeration with this backend marker.
    Continue(String),
    /// The request asks for the page after the final one.
    Exhausted,
    /// Nothing stored matches the requested index.
    OutOfSequence,
}

/// Per-(tenant, resource type) continuation markers.
///
/// Concurrent enumerations of the same resource type in the same tenant are
/// not supported; they overwrite each other's markers.
#[derive(Debug, Default)]
pub struct PagingCursorStore {
    entries: DashMap<(TenantKey, ResourceType), CursorState>,
}

impl PagingCursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a page request, consuming any stored state for the key.
    pub fn next(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        page: &PageRequest,
    ) -> CursorPosition {
        let key = (tenant.clone(), resource.clone());

        if page.starts_fresh() {
            if self.entries.remove(&key).is_some() {
                debug!(tenant = %tenant, resource = %resource, "Restarting enumeration");
            }
            return CursorPosition::Fresh;
        }
        let start_index = page.effective_start_index();

        match self.entries.remove(&key).map(|(_, state)| state) {
            Some(CursorState::Pending {
                expected_start_index,
                cursor,
            }) if expected_start_index == start_index => CursorPosition::Continue(cursor),
            Some(CursorState::Exhausted { next_start_index }) if next_start_index == start_index => {
                CursorPosition::Exhausted
            }
            stored => {
                warn!(
                    tenant = %tenant,
                    resource = %resource,
                    requested_start_index = start_index,
                    stored = ?stored,
                    "Out-of-sequence page request, cursor reset"
                );
                CursorPosition::OutOfSequence
            }
        }
    }

    /// Record the outcome of a served page.
    ///
    /// The next expected start index is `start_index + page_len`. Returns it.
    pub fn record(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        start_index: u64,
        page_len: usize,
        continuation: Option<String>,
    ) -> u64 {
        let next_start_index = start_index + page_len as u64;
        let state = match continuation {
            Some(cursor) => CursorState::Pending {
                expected_start_index: next_start_index,
                cursor,
            },
            None => CursorState::Exhausted { next_start_index },
        };
        self.entries
            .insert((tenant.clone(), resource.clone()), state);
        next_start_index
    }

    /// Put back a marker consumed by a request that then failed, so the
    /// caller can retry the same index.
    pub fn restore(
        &self,
        tenant: &TenantKey,
        resource: &ResourceType,
        start_index: u64,
        cursor: String,
    ) {
        self.entries.insert(
            (tenant.clone(), resource.clone()),
            CursorState::Pending {
                expected_start_index: start_index,
                cursor,
            },
        );
    }

    /// Forget the state of one resource type.
    pub fn reset(&self, tenant: &TenantKey, resource: &ResourceType) {
        self.entries.remove(&(tenant.clone(), resource.clone()));
    }

    /// Forget every resource type of a tenant.
    pub fn clear_tenant(&self, tenant: &TenantKey) {
        self.entries.retain(|(t, _), _| t != tenant);
    }

    /// Number of (tenant, resource type) pairs with stored state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `totalResults` for a page starting at `start_index` with `page_len` items.
#[must_use]
pub fn total_results(start_index: u64, page_len: usize, has_more: bool) -> u64 {
    let served = start_index.saturating_sub(1) + page_len as u64;
    if has_more {
        SENTINEL_TOTAL_RESULTS.max(served + 1)
    } else {
        served
    }
}
