//! Responses and failure messages.

use std::fmt;

use crate::error::MessageError;
use crate::message::{Message, MessageKind, WireMap};
use crate::request::Request;
use crate::value::{Map, Value};

pub const KEY_ERROR: &str = "error";
pub const KEY_ERROR_CODE: &str = "code";
pub const KEY_ERROR_MESSAGE: &str = "message";
pub const KEY_ERROR_DEBUG_MESSAGE: &str = "debugMessage";
pub const KEY_ERROR_CAUSE: &str = "cause";

/// Failure codes produced by the bridge itself
pub mod codes {
    /// No handler on any permitted runtime claimed the request
    pub const NO_HANDLER: &str = "ENOHANDLER";
    /// No response arrived within the request timeout
    pub const TIMEOUT: &str = "EREQUESTTIMEOUT";
    /// The handler returned an error, panicked or dropped its responder
    pub const HANDLER: &str = "EHANDLER";
    /// The request could not be handed to the other runtime
    pub const COUNTERPART: &str = "ECOUNTERPART";
    /// The bridge was reset while the request was pending
    pub const RESET: &str = "EBRIDGERESET";
    /// A payload could not be converted to or from its typed form
    pub const INVALID_DATA: &str = "EINVALIDDATA";
    /// An inbound error map carried no code
    pub const UNKNOWN: &str = "EUNKNOWN";
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure Message
// ─────────────────────────────────────────────────────────────────────────────

/// Why a request failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct FailureMessage {
    code: String,
    message: String,
    debug_message: Option<String>,
    cause: Option<String>,
}

impl FailureMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            debug_message: None,
            cause: None,
        }
    }

    pub fn with_debug_message(mut self, debug_message: impl Into<String>) -> Self {
        self.debug_message = Some(debug_message.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn no_handler(request_name: &str) -> Self {
        Self::new(
            codes::NO_HANDLER,
            format!("No registered request handler found for {request_name}"),
        )
    }

    pub fn timeout() -> Self {
        Self::new(codes::TIMEOUT, "Request timeout")
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(codes::HANDLER, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_DATA, message)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn debug_message(&self) -> Option<&str> {
        self.debug_message.as_deref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn is_timeout(&self) -> bool {
        self.code == codes::TIMEOUT
    }

    pub fn is_no_handler(&self) -> bool {
        self.code == codes::NO_HANDLER
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(KEY_ERROR_CODE.to_string(), Value::from(self.code.as_str()));
        map.insert(
            KEY_ERROR_MESSAGE.to_string(),
            Value::from(self.message.as_str()),
        );
        if let Some(debug) = &self.debug_message {
            map.insert(KEY_ERROR_DEBUG_MESSAGE.to_string(), Value::from(debug.as_str()));
        }
        if let Some(cause) = &self.cause {
            map.insert(KEY_ERROR_CAUSE.to_string(), Value::from(cause.as_str()));
        }
        Value::Object(map)
    }

    /// Parse an `error` sub-map. An empty map means "no failure".
    fn from_value(value: &Value) -> Result<Option<Self>, MessageError> {
        let map = value.as_object().ok_or_else(|| {
            MessageError::Malformed(format!("field `{KEY_ERROR}` must be an object"))
        })?;
        if map.is_empty() {
            return Ok(None);
        }

        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(Some(Self {
            code: text(KEY_ERROR_CODE).unwrap_or_else(|| codes::UNKNOWN.to_string()),
            message: text(KEY_ERROR_MESSAGE).unwrap_or_else(|| "Unknown error".to_string()),
            debug_message: text(KEY_ERROR_DEBUG_MESSAGE),
            cause: text(KEY_ERROR_CAUSE),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

/// The single response correlated to a request by `id`
///
/// A response carries either data or a failure, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    message: Message,
    failure: Option<FailureMessage>,
}

impl Response {
    /// Build a response from its parts. Data is dropped when a failure is given.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        data: Option<Value>,
        failure: Option<FailureMessage>,
    ) -> Self {
        let data = if failure.is_some() { None } else { data };
        Self {
            message: Message::with_id(id, name, MessageKind::Response, data),
            failure,
        }
    }

    /// Successful response to `request`
    pub fn success(request: &Request, data: Option<Value>) -> Self {
        Self::new(request.id(), request.name(), data, None)
    }

    /// Failed response to `request`
    pub fn failure(request: &Request, failure: FailureMessage) -> Self {
        Self::new(request.id(), request.name(), None, Some(failure))
    }

    /// Response to `request` from a handler outcome
    pub fn for_request(request: &Request, outcome: Result<Option<Value>, FailureMessage>) -> Self {
        match outcome {
            Ok(data) => Self::success(request, data),
            Err(failure) => Self::failure(request, failure),
        }
    }

    pub fn id(&self) -> &str {
        self.message.id()
    }

    pub fn name(&self) -> &str {
        self.message.name()
    }

    pub fn data(&self) -> Option<&Value> {
        self.message.data()
    }

    pub fn failure_message(&self) -> Option<&FailureMessage> {
        self.failure.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Split into the payload or the failure
    pub fn into_result(self) -> Result<Option<Value>, FailureMessage> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.message.into_data()),
        }
    }

    pub fn from_map(map: WireMap) -> Result<Self, MessageError> {
        let message = Message::from_map(&map)?;
        message.expect_kind(MessageKind::Response)?;

        let failure = match map.get(KEY_ERROR) {
            Some(error) => FailureMessage::from_value(error)?,
            None => None,
        };

        Ok(Self::new(
            message.id(),
            message.name(),
            message.data().cloned(),
            failure,
        ))
    }

    pub fn to_map(&self) -> WireMap {
        let mut map = self.message.to_map();
        if let Some(failure) = &self.failure {
            map.insert(KEY_ERROR.to_string(), failure.to_value());
        }
        map
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Some(failure) => write!(
                f,
                "Response(id={}, name={}, error={})",
                self.id(),
                self.name(),
                failure
            ),
            None => write!(f, "Response(id={}, name={})", self.id(), self.name()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
