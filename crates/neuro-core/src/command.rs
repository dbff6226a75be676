//! Wire envelope and command catalog
//!
//! Every frame is one JSON object:
//! - game to Neuro: `{"command": ..., "game": ..., "data": {...}}`
//! - Neuro to game: `{"command": ..., "data": {...}}`
//!
//! `data` is optional in both directions. Inbound payloads are checked
//! against the descriptor lists below before being deserialized.

use crate::action::{Action, ActionResult, ForceActionRequest, NeuroAction};
use crate::error::{NeuroError, Result};
use crate::structure::{Field, Kind, validate_structure};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Command names, verbatim from the protocol
pub mod names {
    // Game -> Neuro
    pub const STARTUP: &str = "startup";
    pub const CONTEXT: &str = "context";
    pub const ACTIONS_REGISTER: &str = "actions/register";
    pub const ACTIONS_UNREGISTER: &str = "actions/unregister";
    pub const ACTIONS_FORCE: &str = "actions/force";
    pub const ACTION_RESULT: &str = "action/result";
    pub const SHUTDOWN_READY: &str = "shutdown/ready";

    // Neuro -> game
    pub const ACTION: &str = "action";
    pub const ACTIONS_REREGISTER_ALL: &str = "actions/reregister_all";
    pub const SHUTDOWN_GRACEFUL: &str = "shutdown/graceful";
    pub const SHUTDOWN_IMMEDIATE: &str = "shutdown/immediate";
}

/// Decoded wire envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub command: String,
    /// Present on game-to-Neuro messages only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Message {
    pub fn new(command: impl Into<String>, data: Option<Map<String, Value>>) -> Self {
        Self {
            command: command.into(),
            game: None,
            data,
        }
    }

    /// Stamp the message as coming from `game`
    pub fn with_game(mut self, game: impl Into<String>) -> Self {
        self.game = Some(game.into());
        self
    }

    /// Encode this message into a text frame
    pub fn encode(&self) -> Result<String> {
        encode(&self.command, self.game.as_deref(), self.data.as_ref())
    }
}

/// Build the canonical frame for a command.
///
/// `game` is `None` for Neuro-to-game messages; when present it must be
/// non-empty.
pub fn encode(command: &str, game: Option<&str>, data: Option<&Map<String, Value>>) -> Result<String> {
    if command.is_empty() {
        return Err(NeuroError::ProtocolFormat("command must not be empty".into()));
    }
    if game == Some("") {
        return Err(NeuroError::ProtocolFormat("game title must not be empty".into()));
    }

    #[derive(Serialize)]
    struct Envelope<'a> {
        command: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        game: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<&'a Map<String, Value>>,
    }

    Ok(serde_json::to_string(&Envelope {
        command,
        game,
        data,
    })?)
}

/// Parse and check an inbound frame.
///
/// `"data": null` is treated the same as an absent `data` key.
pub fn decode(frame: impl AsRef<[u8]>) -> Result<Message> {
    let value: Value = serde_json::from_slice(frame.as_ref())?;
    let Value::Object(mut envelope) = value else {
        return Err(NeuroError::ProtocolFormat("message is not a JSON object".into()));
    };

    let command = match envelope.remove("command") {
        Some(Value::String(command)) => command,
        Some(_) => return Err(NeuroError::ProtocolFormat("`command` must be a string".into())),
        None => return Err(NeuroError::ProtocolFormat("missing `command`".into())),
    };

    let game = match envelope.remove("game") {
        Some(Value::String(game)) => Some(game),
        Some(_) => return Err(NeuroError::ProtocolFormat("`game` must be a string".into())),
        None => None,
    };

    let data = match envelope.remove("data") {
        Some(Value::Object(data)) => Some(data),
        Some(Value::Null) | None => None,
        Some(_) => return Err(NeuroError::ProtocolFormat("`data` must be an object".into())),
    };

    Ok(Message {
        command,
        game,
        data,
    })
}

/// Validate `message.data` against `fields` and deserialize it
pub fn parse_payload<T: DeserializeOwned>(message: &Message, fields: &[Field]) -> Result<T> {
    let data = message.data.as_ref().ok_or_else(|| NeuroError::MissingField {
        field: "data".into(),
        expected: "object".into(),
    })?;
    let value = Value::Object(data.clone());
    validate_structure(&value, fields)?;
    Ok(serde_json::from_value(value)?)
}

// Payload shapes

pub const CONTEXT_FIELDS: &[Field] = &[
    Field::required("message", Kind::String),
    Field::required("silent", Kind::Bool),
];

pub const REGISTER_FIELDS: &[Field] = &[Field::required("actions", Kind::ArrayOf(&Kind::Object))];

pub const UNREGISTER_FIELDS: &[Field] = &[Field::required(
    "action_names",
    Kind::ArrayOf(&Kind::String),
)];

pub const FORCE_FIELDS: &[Field] = &[
    Field::optional("state", Kind::Optional(&Kind::String)),
    Field::required("query", Kind::String),
    Field::optional("ephemeral_context", Kind::Bool),
    Field::required("action_names", Kind::ArrayOf(&Kind::String)),
];

pub const RESULT_FIELDS: &[Field] = &[
    Field::required("id", Kind::String),
    Field::required("success", Kind::Bool),
    Field::optional("message", Kind::Optional(&Kind::String)),
];

pub const ACTION_REQUEST_FIELDS: &[Field] = &[
    Field::required("id", Kind::String),
    Field::required("name", Kind::String),
    Field::optional("data", Kind::Optional(&Kind::String)),
];

pub const SHUTDOWN_GRACEFUL_FIELDS: &[Field] = &[Field::required("wants_shutdown", Kind::Bool)];

#[derive(Debug, Clone, Deserialize)]
pub struct ContextData {
    pub message: String,
    pub silent: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterActionsData {
    pub actions: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnregisterActionsData {
    pub action_names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForceActionsData {
    #[serde(default)]
    pub state: Option<String>,
    pub query: String,
    #[serde(default)]
    pub ephemeral_context: bool,
    pub action_names: Vec<String>,
}

impl From<ForceActionsData> for ForceActionRequest {
    fn from(data: ForceActionsData) -> Self {
        Self {
            state: data.state,
            query: data.query,
            action_names: data.action_names.into_iter().collect(),
            ephemeral: data.ephemeral_context,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionResultData {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<ActionResultData> for ActionResult {
    fn from(data: ActionResultData) -> Self {
        Self {
            action_id: data.id,
            success: data.success,
            message: data.message,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownGracefulData {
    pub wants_shutdown: bool,
}

// Builders. Game-side messages still need `with_game` before encoding.

fn object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

pub fn startup() -> Message {
    Message::new(names::STARTUP, None)
}

pub fn context(message: &str, silent: bool) -> Message {
    Message::new(
        names::CONTEXT,
        object(json!({ "message": message, "silent": silent })),
    )
}

pub fn actions_register(actions: &[Action]) -> Message {
    Message::new(names::ACTIONS_REGISTER, object(json!({ "actions": actions })))
}

pub fn actions_unregister(action_names: &[String]) -> Message {
    Message::new(
        names::ACTIONS_UNREGISTER,
        object(json!({ "action_names": action_names })),
    )
}

pub fn actions_force(request: &ForceActionRequest) -> Message {
    let mut data = json!({
        "query": request.query,
        "ephemeral_context": request.ephemeral,
        "action_names": request.action_names,
    });
    if let (Some(state), Some(map)) = (&request.state, data.as_object_mut()) {
        map.insert("state".into(), Value::String(state.clone()));
    }
    Message::new(names::ACTIONS_FORCE, object(data))
}

pub fn action_result(result: &ActionResult) -> Message {
    let mut data = json!({ "id": result.action_id, "success": result.success });
    if let (Some(message), Some(map)) = (&result.message, data.as_object_mut()) {
        map.insert("message".into(), Value::String(message.clone()));
    }
    Message::new(names::ACTION_RESULT, object(data))
}

pub fn shutdown_ready() -> Message {
    Message::new(names::SHUTDOWN_READY, None)
}

pub fn action(request: &NeuroAction) -> Message {
    Message::new(names::ACTION, object(json!(request)))
}

pub fn reregister_all() -> Message {
    Message::new(names::ACTIONS_REREGISTER_ALL, None)
}

pub fn shutdown_graceful(wants_shutdown: bool) -> Message {
    Message::new(
        names::SHUTDOWN_GRACEFUL,
        object(json!({ "wants_shutdown": wants_shutdown })),
    )
}

pub fn shutdown_immediate() -> Message {
    Message::new(names::SHUTDOWN_IMMEDIATE, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_preserves_data() {
        let data = object(json!({
            "text": "héllo \"quoted\"",
            "int": -42,
            "float": 1.5,
            "flag": false,
            "nothing": null,
            "list": [1, "two", [3], {"four": 4}],
            "nested": {"deep": {"deeper": true}}
        }));
        let frame = encode("context", Some("Tic Tac Toe"), data.as_ref()).unwrap();
        let message = decode(&frame).unwrap();

        assert_eq!(message.command, "context");
        assert_eq!(message.game.as_deref(), Some("Tic Tac Toe"));
        assert_eq!(message.data, data);
    }

    #[test]
    fn test_server_direction_omits_game() {
        let frame = reregister_all().encode().unwrap();
        assert_eq!(frame, r#"{"command":"actions/reregister_all"}"#);
        let message = decode(frame.as_bytes()).unwrap();
        assert_eq!(message.game, None);
        assert_eq!(message.data, None);
    }

    #[test]
    fn test_encode_rejects_empty_game() {
        assert!(matches!(
            encode("startup", Some(""), None),
            Err(NeuroError::ProtocolFormat(_))
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_envelopes() {
        for frame in [
            r#"{"command": "startup""#,
            r#"[1, 2, 3]"#,
            r#""startup""#,
            r#"{"game": "x"}"#,
            r#"{"command": 5}"#,
            r#"{"command": "startup", "game": 1}"#,
            r#"{"command": "context", "data": [1]}"#,
            r#"{"command": "context", "data": "text"}"#,
        ] {
            assert!(
                matches!(decode(frame), Err(NeuroError::ProtocolFormat(_))),
                "{frame} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_null_data_is_absent() {
        let message = decode(r#"{"command": "startup", "game": "g", "data": null}"#).unwrap();
        assert_eq!(message.data, None);
    }

    #[test]
    fn test_parse_force_payload() {
        let message = decode(
            r#"{"command":"actions/force","game":"g","data":{"query":"choose","action_names":["attack","flee"]}}"#,
        )
        .unwrap();
        let data: ForceActionsData = parse_payload(&message, FORCE_FIELDS).unwrap();
        let request = ForceActionRequest::from(data);
        assert_eq!(request.state, None);
        assert!(!request.ephemeral);
        assert_eq!(request.action_names.len(), 2);
    }

    #[test]
    fn test_parse_payload_requires_data() {
        let message = decode(r#"{"command":"context","game":"g"}"#).unwrap();
        let result: Result<ContextData> = parse_payload(&message, CONTEXT_FIELDS);
        assert!(matches!(result, Err(NeuroError::MissingField { field, .. }) if field == "data"));
    }

    #[test]
    fn test_parse_result_payload_type_mismatch() {
        let message =
            decode(r#"{"command":"action/result","game":"g","data":{"id":"1","success":"yes"}}"#)
                .unwrap();
        let result: Result<ActionResultData> = parse_payload(&message, RESULT_FIELDS);
        match result {
            Err(NeuroError::TypeMismatch { field, expected }) => {
                assert_eq!(field, "success");
                assert_eq!(expected, "boolean");
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_builders_match_wire_format() {
        let force = ForceActionRequest {
            state: Some("hp:10".into()),
            query: "choose".into(),
            action_names: ["flee".to_string(), "attack".to_string()].into_iter().collect(),
            ephemeral: true,
        };
        let frame = actions_force(&force).with_game("g").encode().unwrap();
        let message = decode(&frame).unwrap();
        let data = message.data.unwrap();
        assert_eq!(data["state"], "hp:10");
        assert_eq!(data["ephemeral_context"], true);
        assert_eq!(data["action_names"], json!(["attack", "flee"]));

        let result = action_result(&ActionResult::success("abc", None));
        assert_eq!(
            Value::Object(result.data.unwrap()),
            json!({"id": "abc", "success": true})
        );

        let request = NeuroAction {
            id: "1".into(),
            name: "jump".into(),
            data: Some("{\"height\":2}".into()),
        };
        let message = decode(action(&request).encode().unwrap()).unwrap();
        assert_eq!(message.command, "action");
        assert_eq!(message.game, None);
        assert_eq!(
            Value::Object(message.data.unwrap()),
            json!({"id": "1", "name": "jump", "data": "{\"height\":2}"})
        );
    }
}
