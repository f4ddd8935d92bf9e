//! Error types for message parsing and payload conversion.

use crate::message::MessageKind;

/// Errors raised while turning wire maps or payloads into typed messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    /// A required envelope field is absent or has the wrong shape.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The envelope parsed, but is not the kind the caller asked for.
    #[error("Expected a {expected} message, got {found}")]
    KindMismatch {
        expected: MessageKind,
        found: MessageKind,
    },

    /// A payload could not be converted to or from its typed form.
    #[error("Invalid payload: {0}")]
    Payload(String),
}

impl MessageError {
    pub(crate) fn missing(field: &str) -> Self {
        MessageError::Malformed(format!("missing required field `{field}`"))
    }

    pub(crate) fn not_a_string(field: &str) -> Self {
        MessageError::Malformed(format!("field `{field}` must be a string"))
    }
}
