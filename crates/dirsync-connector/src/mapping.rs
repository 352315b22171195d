//! Attribute mapping between the canonical model and endpoint objects.
//!
//! Mappers are pure and deterministic. They must accept partial attribute
//! lists: an update may carry only the attributes that changed.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::operation::Attributes;

/// Canonical attribute name → endpoint attribute name.
pub type AttributeMap = BTreeMap<String, String>;

/// Translates attribute names in both directions.
pub trait AttributeMapper: Send + Sync {
    /// Canonical attributes → endpoint attributes.
    fn outbound(&self, canonical: &Attributes, map: &AttributeMap) -> Attributes;

    /// Endpoint object → canonical object.
    fn inbound(&self, endpoint: &Value, map: &AttributeMap) -> Value;
}

/// Mapper that renames top-level attributes according to the map.
///
/// Attributes with no entry in the map pass through under their own name.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameMapper;

impl AttributeMapper for RenameMapper {
    fn outbound(&self, canonical: &Attributes, map: &AttributeMap) -> Attributes {
        canonical
            .iter()
            .map(|(name, value)| {
                let target = map.get(name).cloned().unwrap_or_else(|| name.clone());
                (target, value.clone())
            })
            .collect()
    }

    fn inbound(&self, endpoint: &Value, map: &AttributeMap) -> Value {
        let Some(object) = endpoint.as_object() else {
            return endpoint.clone();
        };

        let reverse: BTreeMap<&str, &str> = map
            .iter()
            .map(|(canonical, target)| (target.as_str(), canonical.as_str()))
            .collect();

        let translated: Attributes = object
            .iter()
            .map(|(name, value)| {
                let canonical = reverse
                    .get(name.as_str())
                    .map_or_else(|| name.clone(), |c| (*c).to_string());
                (canonical, value.clone())
            })
            .collect();

        Value::Object(translated)
    }
}
