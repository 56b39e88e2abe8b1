//! Rendered values tree with flatten/nest support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{ConfigError, Result};

/// Nested helm values produced by the renderer
///
/// Leaves are strings or booleans; every intermediate node is an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderedValues(JsonValue);

impl Default for RenderedValues {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderedValues {
    /// Create an empty tree
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Set a leaf by dotted path (e.g., "image.tag"), creating parents
    pub fn set(&mut self, path: &str, value: JsonValue) -> std::result::Result<(), ConfigError> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::InvalidKey {
                key: path.to_string(),
            });
        }
        set_nested(&mut self.0, &parts, value, path)
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Flatten into `path=value` tokens, ordered by path
    pub fn flatten(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        flatten_into(&self.0, &mut String::new(), &mut tokens);
        tokens
    }

    /// Rebuild a tree from `path=value` tokens
    pub fn nest<S: AsRef<str>>(tokens: &[S]) -> std::result::Result<Self, ConfigError> {
        let mut values = Self::new();
        for token in tokens {
            let token = token.as_ref();
            let (path, raw) = token
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidToken {
                    token: token.to_string(),
                })?;
            values.set(path, coerce(raw))?;
        }
        Ok(values)
    }

    /// Serialize as a YAML values document
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Write a YAML values file suitable for `helm -f`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

/// Coerce a raw string into a values leaf
///
/// Only `true`/`false` (any case) become booleans; numeric-looking strings
/// stay strings so leading zeros and formatting survive.
pub fn coerce(raw: &str) -> JsonValue {
    if raw.eq_ignore_ascii_case("true") {
        JsonValue::Bool(true)
    } else if raw.eq_ignore_ascii_case("false") {
        JsonValue::Bool(false)
    } else {
        JsonValue::String(raw.to_string())
    }
}

fn leaf_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn flatten_into(value: &JsonValue, prefix: &mut String, tokens: &mut Vec<String>) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                let len = prefix.len();
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(key);
                flatten_into(child, prefix, tokens);
                prefix.truncate(len);
            }
        }
        leaf => tokens.push(format!("{}={}", prefix, leaf_to_string(leaf))),
    }
}

/// Set a nested value by path, refusing to turn leaves into parents
fn set_nested(
    value: &mut JsonValue,
    path: &[&str],
    new_value: JsonValue,
    full_key: &str,
) -> std::result::Result<(), ConfigError> {
    let conflict = || ConfigError::KeyConflict {
        key: full_key.to_string(),
    };

    let Some(map) = value.as_object_mut() else {
        return Err(conflict());
    };

    let key = path[0];
    let remaining = &path[1..];

    if remaining.is_empty() {
        if map.get(key).is_some_and(JsonValue::is_object) {
            return Err(conflict());
        }
        map.insert(key.to_string(), new_value);
        return Ok(());
    }

    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
    set_nested(entry, remaining, new_value, full_key)
}

/// Get a nested value by path
fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }

    match value {
        JsonValue::Object(map) => map.get(path[0]).and_then(|v| get_nested(v, &path[1..])),
        _ => None,
    }
}
