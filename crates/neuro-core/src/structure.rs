//! Declarative structural validation of JSON payloads
//!
//! A payload shape is a slice of [`Field`] descriptors. Each descriptor names
//! a key, says whether it must be present, and gives the expected [`Kind`].
//! Kinds nest, so "optional string" or "mapping of string to object" are
//! plain values rather than special cases.

use crate::error::{NeuroError, Result};
use serde_json::{Map, Value};

/// Expected JSON kind of a field
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    /// Anything, including null
    Any,
    String,
    Bool,
    Number,
    Integer,
    /// A JSON object with arbitrary contents
    Object,
    /// The inner kind, or null
    Optional(&'static Kind),
    /// An array whose every element has the inner kind
    ArrayOf(&'static Kind),
    /// An object whose every value has the inner kind
    MapOf(&'static Kind),
    /// An object matching a nested descriptor list
    Record(&'static [Field]),
}

impl Kind {
    /// Human-readable name used in error messages
    pub fn describe(&self) -> String {
        match self {
            Kind::Any => "any value".into(),
            Kind::String => "string".into(),
            Kind::Bool => "boolean".into(),
            Kind::Number => "number".into(),
            Kind::Integer => "integer".into(),
            Kind::Object | Kind::Record(_) => "object".into(),
            Kind::Optional(inner) => format!("optional {}", inner.describe()),
            Kind::ArrayOf(inner) => format!("array of {}", inner.describe()),
            Kind::MapOf(inner) => format!("mapping of string to {}", inner.describe()),
        }
    }
}

/// One entry of a payload shape
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
    pub kind: Kind,
}

impl Field {
    pub const fn required(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            required: true,
            kind,
        }
    }

    pub const fn optional(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            required: false,
            kind,
        }
    }
}

/// Check `value` against `fields` and return it as an object.
///
/// Keys not named by any descriptor are ignored. The first failure wins and
/// names the offending field by its dotted path (`actions[2].name`).
pub fn validate_structure<'a>(value: &'a Value, fields: &[Field]) -> Result<&'a Map<String, Value>> {
    let map = value.as_object().ok_or_else(|| NeuroError::TypeMismatch {
        field: "data".into(),
        expected: "object".into(),
    })?;
    validate_fields(map, fields, "")?;
    Ok(map)
}

fn validate_fields(map: &Map<String, Value>, fields: &[Field], path: &str) -> Result<()> {
    for field in fields {
        let field_path = join(path, field.name);
        match map.get(field.name) {
            Some(value) => check_kind(value, &field.kind, &field_path)?,
            None if field.required => {
                return Err(NeuroError::MissingField {
                    field: field_path,
                    expected: field.kind.describe(),
                });
            }
            None => {}
        }
    }
    Ok(())
}

fn check_kind(value: &Value, kind: &Kind, path: &str) -> Result<()> {
    let ok = match kind {
        Kind::Any => true,
        Kind::String => value.is_string(),
        Kind::Bool => value.is_boolean(),
        Kind::Number => value.is_number(),
        Kind::Integer => value.is_i64() || value.is_u64(),
        Kind::Object => value.is_object(),
        Kind::Optional(inner) => {
            return if value.is_null() {
                Ok(())
            } else {
                check_kind(value, inner, path).map_err(|err| match err {
                    NeuroError::TypeMismatch { field, .. } if field == path => mismatch(path, kind),
                    other => other,
                })
            };
        }
        Kind::ArrayOf(inner) => {
            let items = value.as_array().ok_or_else(|| mismatch(path, kind))?;
            for (idx, item) in items.iter().enumerate() {
                check_kind(item, inner, &format!("{path}[{idx}]"))?;
            }
            return Ok(());
        }
        Kind::MapOf(inner) => {
            let entries = value.as_object().ok_or_else(|| mismatch(path, kind))?;
            for (key, item) in entries {
                check_kind(item, inner, &join(path, key))?;
            }
            return Ok(());
        }
        Kind::Record(fields) => {
            let entries = value.as_object().ok_or_else(|| mismatch(path, kind))?;
            return validate_fields(entries, fields, path);
        }
    };

    if ok { Ok(()) } else { Err(mismatch(path, kind)) }
}

fn mismatch(path: &str, kind: &Kind) -> NeuroError {
    NeuroError::TypeMismatch {
        field: path.to_string(),
        expected: kind.describe(),
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}
