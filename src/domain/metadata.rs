//! Provider metadata carried on a transaction.
//!
//! The map is schemaless and provider-defined. It is stored as a versioned envelope so the
//! column layout can evolve without touching the transaction schema, and nothing in the
//! reconciliation path reads individual keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const METADATA_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    #[serde(rename = "v")]
    pub version: u16,
    pub fields: Map<String, Value>,
}

impl Default for ProviderMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            fields: Map::new(),
        }
    }
}

impl ProviderMetadata {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            version: METADATA_VERSION,
            fields,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Adds keys from `other` that are not already present. Existing values are kept.
    /// Returns the number of keys added.
    pub fn append_missing(&mut self, other: &ProviderMetadata) -> usize {
        let mut added = 0;
        for (key, value) in &other.fields {
            if !self.fields.contains_key(key) {
                self.fields.insert(key.clone(), value.clone());
                added += 1;
            }
        }
        added
    }
}
