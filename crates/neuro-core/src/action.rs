//! Actions, action requests and action results

use crate::error::{NeuroError, Result};
use crate::schema::check_schema;
use crate::structure::{Field, Kind, validate_structure};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An operation the AI peer may invoke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique name, `[a-z0-9_-]+`
    pub name: String,
    /// Plaintext description shown to Neuro
    pub description: String,
    /// JSON schema for the action data, top-level `"type": "object"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

impl Action {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// A request from Neuro to execute a registered action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuroAction {
    /// Correlation id; the matching result must carry it
    pub id: String,
    pub name: String,
    /// JSON-stringified action data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl NeuroAction {
    /// Deserialize the stringified `data`, if any
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.data.as_deref() {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

/// Outcome of executing a [`NeuroAction`]
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub action_id: String,
    pub success: bool,
    pub message: Option<String>,
}

impl ActionResult {
    pub fn success(action_id: impl Into<String>, message: Option<String>) -> Self {
        Self {
            action_id: action_id.into(),
            success: true,
            message,
        }
    }

    pub fn failure(action_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            success: false,
            message: Some(message.into()),
        }
    }
}

/// A request that Neuro choose one of `action_names` right now
#[derive(Debug, Clone, PartialEq)]
pub struct ForceActionRequest {
    /// Game state description, any text format
    pub state: Option<String>,
    /// What Neuro is supposed to be doing
    pub query: String,
    pub action_names: BTreeSet<String>,
    /// Forget `state` and `query` once the force completes
    pub ephemeral: bool,
}

/// Shape of one entry in an `actions/register` payload
pub const ACTION_FIELDS: &[Field] = &[
    Field::required("name", Kind::String),
    Field::required("description", Kind::String),
    Field::optional("schema", Kind::Optional(&Kind::Object)),
];

/// Check that a name is non-empty and only uses `[a-z0-9_-]`
pub fn check_action_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(NeuroError::ActionName(name.to_string()))
    }
}

/// Validate an action's name and schema
pub fn check_action(action: &Action) -> Result<()> {
    check_action_name(&action.name)?;
    if let Some(schema) = &action.schema {
        check_schema(schema)?;
    }
    Ok(())
}

/// Decode and validate raw action objects.
///
/// Fails on the first invalid entry; nothing is returned in that case.
pub fn deserialize_actions(raw: &[serde_json::Value]) -> Result<Vec<Action>> {
    raw.iter()
        .enumerate()
        .map(|(idx, value)| {
            validate_structure(value, ACTION_FIELDS).map_err(|err| prefix_path(err, idx))?;
            let action: Action = serde_json::from_value(value.clone())?;
            check_action(&action)?;
            Ok(action)
        })
        .collect()
}

fn prefix_path(err: NeuroError, idx: usize) -> NeuroError {
    match err {
        NeuroError::MissingField { field, expected } => NeuroError::MissingField {
            field: format!("actions[{idx}].{field}"),
            expected,
        },
        NeuroError::TypeMismatch { field, expected } => NeuroError::TypeMismatch {
            field: format!("actions[{idx}].{field}"),
            expected,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_names_accepted() {
        for name in ["jump", "a", "move_left", "slot-3", "0", "_", "-", "abc_123-xyz"] {
            assert!(check_action_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "Jump", "move left", "a.b", "é", "tab\t", "UPPER", "x/y"] {
            assert!(
                matches!(check_action_name(name), Err(NeuroError::ActionName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_check_action_validates_schema() {
        let ok = Action::new("place", "Place a piece").with_schema(json!({
            "type": "object",
            "properties": {"cell": {"type": "integer"}}
        }));
        assert!(check_action(&ok).is_ok());

        let bad = Action::new("place", "Place a piece").with_schema(json!({
            "type": "object",
            "properties": {"cell": {"$ref": "#/defs/cell"}}
        }));
        assert!(matches!(
            check_action(&bad),
            Err(NeuroError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_deserialize_actions() {
        let raw = vec![
            json!({"name": "jump", "description": "Jump"}),
            json!({"name": "say", "description": "Say", "schema": {"type": "object"}}),
            json!({"name": "wait", "description": "Wait", "schema": null}),
        ];
        let actions = deserialize_actions(&raw).unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0], Action::new("jump", "Jump"));
        assert!(actions[1].schema.is_some());
        assert!(actions[2].schema.is_none());
    }

    #[test]
    fn test_deserialize_actions_fails_fast() {
        let raw = vec![
            json!({"name": "jump", "description": "Jump"}),
            json!({"name": "Bad Name", "description": "x"}),
            json!({"description": "missing name"}),
        ];
        assert!(matches!(
            deserialize_actions(&raw),
            Err(NeuroError::ActionName(name)) if name == "Bad Name"
        ));

        let raw = vec![json!({"name": "jump"})];
        match deserialize_actions(&raw) {
            Err(NeuroError::MissingField { field, .. }) => {
                assert_eq!(field, "actions[0].description")
            }
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_action_serialization_omits_missing_schema() {
        let json = serde_json::to_string(&Action::new("jump", "Jump")).unwrap();
        assert_eq!(json, r#"{"name":"jump","description":"Jump"}"#);
    }

    #[test]
    fn test_parse_data() {
        #[derive(Deserialize)]
        struct Move {
            cell: u8,
        }

        let mut action = NeuroAction {
            id: "1".into(),
            name: "play".into(),
            data: Some(r#"{"cell": 4}"#.into()),
        };
        let parsed: Option<Move> = action.parse_data().unwrap();
        assert_eq!(parsed.map(|m| m.cell), Some(4));

        action.data = Some("{not json".into());
        assert!(matches!(
            action.parse_data::<Move>(),
            Err(NeuroError::ProtocolFormat(_))
        ));

        action.data = None;
        assert!(action.parse_data::<Move>().unwrap().is_none());
    }
}
