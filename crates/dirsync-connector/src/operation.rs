//! Directory synchronization operation types
//!
//! Canonical attribute bags, page requests and enumerate results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attributes of a canonical or endpoint object, keyed by attribute name.
pub type Attributes = Map<String, Value>;

/// Pagination parameters for an enumerate request.
///
/// Indices are 1-based. A request with neither field set is unpaginated and
/// returns every object the backend holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// 1-based index of the first object to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u64>,

    /// Maximum number of objects to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl PageRequest {
    /// Request every object in one response.
    #[must_use]
    pub fn unpaginated() -> Self {
        Self::default()
    }

    /// Request one page.
    #[must_use]
    pub fn new(start_index: u64, count: u64) -> Self {
        Self {
            start_index: Some(start_index),
            count: Some(count),
        }
    }

    /// Request the first page with the given size.
    #[must_use]
    pub fn first(count: u64) -> Self {
        Self {
            start_index: None,
            count: Some(count),
        }
    }

    /// Whether the caller asked for paging at all.
    #[must_use]
    pub fn is_paginated(&self) -> bool {
        self.start_index.is_some() || self.count.is_some()
    }

    /// Start index with the 1-based default applied (0 is treated as 1).
    #[must_use]
    pub fn effective_start_index(&self) -> u64 {
        self.start_index.unwrap_or(1).max(1)
    }

    /// Whether this request begins a fresh enumeration.
    #[must_use]
    pub fn starts_fresh(&self) -> bool {
        self.start_index.map_or(true, |i| i <= 1)
    }
}

/// Result of an enumerate call, as handed to the outer provisioning layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    /// Canonical objects on this page.
    pub resources: Vec<Value>,

    /// Real or sentinel total (see the paging module).
    pub total_results: u64,
}

impl ListResponse {
    /// Create a response.
    #[must_use]
    pub fn new(resources: Vec<Value>, total_results: u64) -> Self {
        Self {
            resources,
            total_results,
        }
    }

    /// An empty page reporting the given total.
    #[must_use]
    pub fn empty(total_results: u64) -> Self {
        Self::new(Vec::new(), total_results)
    }

    /// Number of objects on this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the page carries no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
