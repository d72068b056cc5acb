//! JSON persistence for build configurations.
//!
//! Documents are flat objects with sorted keys. A `build-system` key marks the
//! producer and is stripped again on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::schema::SCHEMA_ID_KEY;
use crate::core::state::ConfigurationState;
use crate::core::value::OptionValue;

const CONFIGURATION_SCHEMA: &str = include_str!("../../schemas/configuration.schema.json");

/// Value written under [`SCHEMA_ID_KEY`].
pub const SCHEMA_ID_VALUE: &str = "nuitka-toolkit";

/// Parse a configuration document into typed values.
///
/// The document must satisfy the embedded JSON Schema. Null values, the empty
/// key and the schema-identifying key are dropped; numbers become text.
pub fn parse_document(raw: &str) -> Result<BTreeMap<String, OptionValue>> {
    let document: Value = serde_json::from_str(raw).context("parse configuration json")?;
    let schema: Value =
        serde_json::from_str(CONFIGURATION_SCHEMA).context("parse configuration schema")?;
    validate_schema(&document, &schema)?;

    let Value::Object(entries) = document else {
        bail!("configuration document must be an object");
    };
    let mut values = BTreeMap::new();
    for (key, value) in entries {
        if key.is_empty() || key == SCHEMA_ID_KEY {
            continue;
        }
        let typed = match value {
            Value::Bool(flag) => OptionValue::Bool(flag),
            Value::String(text) => OptionValue::Text(text),
            Value::Number(number) => OptionValue::Text(number.to_string()),
            Value::Array(items) => OptionValue::List(
                items
                    .into_iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
            ),
            Value::Null | Value::Object(_) => continue,
        };
        values.insert(key, typed);
    }
    Ok(values)
}

/// Render `state` as a sorted, two-space indented document.
pub fn render_document(state: &ConfigurationState) -> Result<String> {
    let mut document: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in state.to_document() {
        document.insert(key, serde_json::to_value(value).context("serialize option value")?);
    }
    document.insert(
        SCHEMA_ID_KEY.to_string(),
        Value::String(SCHEMA_ID_VALUE.to_string()),
    );
    let mut payload = serde_json::to_string_pretty(&document).context("serialize configuration")?;
    payload.push('\n');
    Ok(payload)
}

/// Load a document from disk and merge it over the session defaults.
pub fn load_configuration(path: &Path) -> Result<ConfigurationState> {
    debug!(path = %path.display(), "loading configuration");
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let document =
        parse_document(&raw).with_context(|| format!("load configuration {}", path.display()))?;
    let mut state = ConfigurationState::default();
    state.merge_document(document);
    Ok(state)
}

/// Atomically write `state` to `path` (temp file + rename).
pub fn dump_configuration(path: &Path, state: &ConfigurationState) -> Result<()> {
    debug!(path = %path.display(), keys = state.len(), "writing configuration");
    let payload = render_document(state)?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload)
        .with_context(|| format!("write temp configuration {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace configuration {}", path.display()))?;
    Ok(())
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
