//! Typed option values carried by the configuration mapping.

use serde::{Deserialize, Serialize};

/// Value stored under one option key.
///
/// Serialized untagged so persisted documents stay a flat mapping of
/// booleans, strings and string arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

/// Shape a schema entry expects for its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Bool,
    Text,
}

impl OptionValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Text(_) => "string",
            Self::List(_) => "list",
        }
    }

    /// `Some` only for an actual boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Text view; lists are joined with single spaces.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(value) => Some(value.clone()),
            Self::List(items) => Some(items.join(" ")),
            Self::Bool(_) => None,
        }
    }

    /// Loose truthiness used for keys that were not declared in the schema.
    pub fn is_set(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(value) => !value.trim().is_empty(),
            Self::List(items) => items.iter().any(|item| !item.trim().is_empty()),
        }
    }

    pub fn matches(&self, shape: Shape) -> bool {
        matches!(
            (self, shape),
            (Self::Bool(_), Shape::Bool) | (Self::Text(_) | Self::List(_), Shape::Text)
        )
    }

    /// Parse a command-line override: `true`/`false` become booleans.
    pub fn parse_override(raw: &str) -> Self {
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
