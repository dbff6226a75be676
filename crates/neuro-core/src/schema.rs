//! Action schema restrictions
//!
//! Neuro accepts a subset of JSON Schema. The top level must be an object
//! schema, and keywords in [`INVALID_SCHEMA_KEYS`] are rejected wherever a
//! subschema can appear.

use crate::error::{NeuroError, Result};
use serde_json::{Map, Value};

/// Keywords that may not appear anywhere in an action schema
pub const INVALID_SCHEMA_KEYS: &[&str] = &[
    "$anchor",
    "$comment",
    "$defs",
    "$dynamicAnchor",
    "$dynamicRef",
    "$id",
    "$ref",
    "$schema",
    "$vocabulary",
    "contentEncoding",
    "contentMediaType",
    "contentSchema",
    "dependentRequired",
    "dependentSchemas",
    "deprecated",
    "else",
    "if",
    "maxProperties",
    "minProperties",
    "not",
    "patternProperties",
    "readOnly",
    "then",
    "unevaluatedItems",
    "unevaluatedProperties",
    "writeOnly",
];

/// Keywords whose value is a single subschema
const SCHEMA_KEYWORDS: &[&str] = &[
    "additionalItems",
    "additionalProperties",
    "contains",
    "propertyNames",
];

/// Keywords whose value is an array of subschemas
const SCHEMA_ARRAY_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf", "prefixItems"];

/// Keywords whose value maps names to subschemas
const SCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "definitions"];

/// Validate an action schema.
///
/// Errors carry the offending key and a dotted path rooted at `schema`.
pub fn check_schema(schema: &Value) -> Result<()> {
    let root = schema
        .as_object()
        .ok_or_else(|| invalid("type", "schema"))?;
    if root.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("type", "schema.type"));
    }
    scan(root, "schema")
}

fn scan(schema: &Map<String, Value>, path: &str) -> Result<()> {
    for (key, value) in schema {
        let key_path = format!("{path}.{key}");
        if INVALID_SCHEMA_KEYS.contains(&key.as_str()) {
            return Err(invalid(key, &key_path));
        }

        if key == "items" {
            // `items` is either one schema or a tuple of schemas
            match value {
                Value::Array(items) => scan_list(items, &key_path)?,
                other => scan_value(other, &key_path)?,
            }
        } else if SCHEMA_KEYWORDS.contains(&key.as_str()) {
            scan_value(value, &key_path)?;
        } else if SCHEMA_ARRAY_KEYWORDS.contains(&key.as_str()) {
            if let Value::Array(items) = value {
                scan_list(items, &key_path)?;
            }
        } else if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) {
            if let Value::Object(entries) = value {
                for (name, subschema) in entries {
                    scan_value(subschema, &format!("{key_path}.{name}"))?;
                }
            }
        }
    }
    Ok(())
}

fn scan_list(items: &[Value], path: &str) -> Result<()> {
    for (idx, item) in items.iter().enumerate() {
        scan_value(item, &format!("{path}[{idx}]"))?;
    }
    Ok(())
}

// Boolean schemas (`true`/`false`) have nothing to scan.
fn scan_value(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::Object(map) => scan(map, path),
        _ => Ok(()),
    }
}

fn invalid(key: &str, path: &str) -> NeuroError {
    NeuroError::SchemaValidation {
        key: key.to_string(),
        path: path.to_string(),
    }
}
