//! Order-preserving configuration mapping shared with the presentation layer.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::schema::{self, OPTIONS};
use crate::core::value::OptionValue;

/// Flat mapping from option key to typed value.
///
/// Iteration follows insertion order: schema keys first (in table order),
/// then keys added later. Missing keys read as absent/false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationState {
    values: IndexMap<String, OptionValue>,
}

impl Default for ConfigurationState {
    fn default() -> Self {
        let values = OPTIONS
            .iter()
            .map(|option| (option.key.to_string(), option.initial.to_value()))
            .collect();
        Self { values }
    }
}

impl ConfigurationState {
    /// Mapping with no keys at all (every lookup reads as absent).
    pub fn empty() -> Self {
        Self {
            values: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    /// Boolean value of `key`; absent or non-boolean reads as `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(OptionValue::as_bool).unwrap_or(false)
    }

    /// Trimmed text value of `key`; absent or boolean reads as empty.
    pub fn text(&self, key: &str) -> String {
        self.get(key)
            .and_then(OptionValue::as_text)
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    }

    /// Single-key edit. Existing keys keep their position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn set_plugin(&mut self, id: &str, enabled: bool) {
        self.set(schema::plugin_key(id), enabled);
    }

    /// Wholesale load: values from `document` replace the current ones.
    ///
    /// The schema-identifying key is dropped; unknown keys are appended.
    pub fn merge_document(&mut self, document: BTreeMap<String, OptionValue>) {
        for (key, value) in document {
            if key == schema::SCHEMA_ID_KEY {
                continue;
            }
            self.values.insert(key, value);
        }
    }

    /// Snapshot with deterministic (sorted) key order for persistence.
    pub fn to_document(&self) -> BTreeMap<String, OptionValue> {
        self.values
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Enabled plugin identifiers, sorted.
    pub fn enabled_plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> = self
            .iter()
            .filter(|(_, value)| value.as_bool() == Some(true))
            .filter_map(|(key, _)| schema::plugin_id(key).map(str::to_string))
            .collect();
        plugins.sort();
        plugins.dedup();
        plugins
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
