//! Error types for the Neuro protocol

use thiserror::Error;

/// Result type for Neuro protocol operations
pub type Result<T> = std::result::Result<T, NeuroError>;

/// Neuro protocol error types
#[derive(Debug, Error)]
pub enum NeuroError {
    /// Connect, read or write failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// WebSocket handshake did not complete
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed JSON or a malformed envelope
    #[error("Protocol format error: {0}")]
    ProtocolFormat(String),

    /// A required field is absent
    #[error("Missing field `{field}` (expected {expected})")]
    MissingField { field: String, expected: String },

    /// A field is present with the wrong JSON kind
    #[error("Field `{field}` has the wrong type (expected {expected})")]
    TypeMismatch { field: String, expected: String },

    /// Action schema contains an unsupported key
    #[error("Schema validation error: `{key}` is not allowed (at {path})")]
    SchemaValidation { key: String, path: String },

    /// Action name is empty or uses characters outside `[a-z0-9_-]`
    #[error("Invalid action name: {0:?}")]
    ActionName(String),

    /// An action with this name is already registered
    #[error("Action already registered: {0}")]
    DuplicateAction(String),

    /// An `action/result` referenced an id that is not outstanding
    #[error("No pending action with id {0}")]
    UnknownResultCorrelation(String),

    /// A user-supplied action handler failed
    #[error("Action handler failed: {0}")]
    Handler(String),

    /// Command sent out of order (e.g. registering before startup)
    #[error("Protocol sequence error: {0}")]
    ProtocolSequence(String),

    /// A force action is already outstanding for this session
    #[error("A force action is already pending")]
    ConcurrentForceAction,

    /// Operation attempted without a live connection
    #[error("Not connected")]
    NotConnected,

    /// A network-facing operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The operation was abandoned because its session stopped
    #[error("Cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NeuroError {
    /// Errors caused by a single bad message. The read loop drops the
    /// message and keeps going.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            NeuroError::ProtocolFormat(_)
                | NeuroError::MissingField { .. }
                | NeuroError::TypeMismatch { .. }
                | NeuroError::SchemaValidation { .. }
                | NeuroError::ActionName(_)
        )
    }

    /// Errors that end the connection.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            NeuroError::ConnectionClosed | NeuroError::Transport(_) | NeuroError::NotConnected
        )
    }
}

impl From<serde_json::Error> for NeuroError {
    fn from(err: serde_json::Error) -> Self {
        NeuroError::ProtocolFormat(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(NeuroError::ProtocolFormat("bad".into()).is_format_error());
        assert!(
            NeuroError::MissingField {
                field: "id".into(),
                expected: "string".into()
            }
            .is_format_error()
        );
        assert!(!NeuroError::ConnectionClosed.is_format_error());
        assert!(NeuroError::ConnectionClosed.is_disconnect());
        assert!(!NeuroError::DuplicateAction("jump".into()).is_disconnect());
    }

    #[test]
    fn test_from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(NeuroError::from(err), NeuroError::ProtocolFormat(_)));
    }
}
