//! # Directory Synchronization Connector
//!
//! Shared vocabulary for synchronizing a canonical identity model against
//! external directory backends.
//!
//! This crate has no I/O. It defines what every backend adapter and the
//! synchronization client agree on:
//!
//! - [`ids`] - Type-safe identifiers (`TenantKey`, `ResourceType`, `RequestId`)
//! - [`error`] - Error taxonomy with stable kinds and protocol status mapping
//! - [`operation`] - Page requests and enumerate results
//! - [`mapping`] - The `AttributeMapper` contract and a rename-table mapper
//! - [`config`] - Connection settings

pub mod config;
pub mod error;
pub mod ids;
pub mod mapping;
pub mod operation;

/// Prelude module for convenient imports.
///
/// ```
/// use dirsync_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::ConnectionSettings;
    pub use crate::error::{
        ConnectorError, ConnectorResult, ErrorKind, ProtocolError, TransportCode,
    };
    pub use crate::ids::{RequestId, ResourceType, TenantKey};
    pub use crate::mapping::{AttributeMap, AttributeMapper, RenameMapper};
    pub use crate::operation::{Attributes, ListResponse, PageRequest};
}
