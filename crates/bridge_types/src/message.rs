//! Message envelope and its wire-map codec
//!
//! Every message crossing the bridge is a flat map:
//!
//! | key    | shape                                     |
//! |--------|-------------------------------------------|
//! | `id`   | string, unique per message                |
//! | `name` | string, routing key (`com.example.calc`)  |
//! | `type` | `"request"`, `"response"` or `"event"`    |
//! | `data` | any [`Value`], omitted when absent        |
//!
//! Requests and responses add their own keys on top (see [`crate::Request`]
//! and [`crate::Response`]).

use std::fmt;

use crate::error::MessageError;
use crate::event::Event;
use crate::request::Request;
use crate::response::Response;
use crate::value::{Map, Value};

pub const KEY_ID: &str = "id";
pub const KEY_NAME: &str = "name";
pub const KEY_TYPE: &str = "type";
pub const KEY_DATA: &str = "data";

/// Generic key-value form of a message.
pub type WireMap = Map;

/// Generate a fresh message id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Kind
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a bridge message
///
/// Unrecognized tokens parse to `Unknown` so newer peers cannot crash older
/// receivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Response,
    Event,
    Unknown(String),
}

impl MessageKind {
    /// Parse a wire token. Accepts the short `req`/`rsp` forms as aliases.
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "request" | "req" => MessageKind::Request,
            "response" | "rsp" => MessageKind::Response,
            "event" => MessageKind::Event,
            _ => MessageKind::Unknown(token.to_string()),
        }
    }

    /// Wire token for this kind
    pub fn as_token(&self) -> &str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Event => "event",
            MessageKind::Unknown(token) => token,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Wire-independent message envelope
///
/// `id` and `name` are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    name: String,
    kind: MessageKind,
    data: Option<Value>,
}

impl Message {
    /// Create a message with a freshly generated id
    pub fn new(name: impl Into<String>, kind: MessageKind, data: Option<Value>) -> Self {
        Self::with_id(generate_id(), name, kind, data)
    }

    /// Create a message with an explicit id
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: MessageKind,
        data: Option<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<Value> {
        self.data
    }

    /// Parse the envelope fields of a wire map
    ///
    /// Fails with [`MessageError::Malformed`] when `id`, `name` or `type` is
    /// missing or not a string. Keys other than the envelope keys are ignored.
    pub fn from_map(map: &WireMap) -> Result<Self, MessageError> {
        let id = required_str(map, KEY_ID)?;
        let name = required_str(map, KEY_NAME)?;
        let kind = MessageKind::parse(required_str(map, KEY_TYPE)?);

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            data: map.get(KEY_DATA).cloned(),
        })
    }

    /// Serialize the envelope fields into a wire map
    pub fn to_map(&self) -> WireMap {
        let mut map = WireMap::new();
        map.insert(KEY_ID.to_string(), Value::from(self.id.as_str()));
        map.insert(KEY_NAME.to_string(), Value::from(self.name.as_str()));
        map.insert(KEY_TYPE.to_string(), Value::from(self.kind.as_token()));
        if let Some(data) = &self.data {
            map.insert(KEY_DATA.to_string(), data.clone());
        }
        map
    }

    pub(crate) fn expect_kind(&self, expected: MessageKind) -> Result<(), MessageError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(MessageError::KindMismatch {
                expected,
                found: self.kind.clone(),
            })
        }
    }
}

pub(crate) fn required_str<'a>(map: &'a WireMap, key: &str) -> Result<&'a str, MessageError> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(MessageError::not_a_string(key)),
        None => Err(MessageError::missing(key)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a wire map as a JSON string
pub fn map_to_json(map: &WireMap) -> Result<String, MessageError> {
    serde_json::to_string(map).map_err(|e| MessageError::Payload(e.to_string()))
}

/// Decode a JSON object string into a wire map
pub fn map_from_json(json: &str) -> Result<WireMap, MessageError> {
    serde_json::from_str(json).map_err(|e| MessageError::Malformed(e.to_string()))
}

/// A message with a wire-map form, and therefore a JSON form
pub trait WireMessage: Sized {
    fn encode(&self) -> WireMap;
    fn decode(map: WireMap) -> Result<Self, MessageError>;

    fn to_json(&self) -> Result<String, MessageError> {
        map_to_json(&self.encode())
    }

    fn from_json(json: &str) -> Result<Self, MessageError> {
        Self::decode(map_from_json(json)?)
    }
}

macro_rules! wire_message {
    ($($ty:ty),*) => {
        $(impl WireMessage for $ty {
            fn encode(&self) -> WireMap {
                self.to_map()
            }

            fn decode(map: WireMap) -> Result<Self, MessageError> {
                <$ty>::from_map(map)
            }
        })*
    };
}

wire_message!(Request, Response, Event, BridgeMessage);

// ─────────────────────────────────────────────────────────────────────────────
// Decoded Message
// ─────────────────────────────────────────────────────────────────────────────

/// A wire map decoded into its typed form
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Request(Request),
    Response(Response),
    Event(Event),
    /// Envelope with a kind this build does not understand
    Unknown(Message),
}

impl BridgeMessage {
    /// Decode a wire map, dispatching on its `type` token
    pub fn from_map(map: WireMap) -> Result<Self, MessageError> {
        let envelope = Message::from_map(&map)?;
        Ok(match envelope.kind().clone() {
            MessageKind::Request => BridgeMessage::Request(Request::from_map(map)?),
            MessageKind::Response => BridgeMessage::Response(Response::from_map(map)?),
            MessageKind::Event => BridgeMessage::Event(Event::from_map(map)?),
            MessageKind::Unknown(_) => BridgeMessage::Unknown(envelope),
        })
    }

    pub fn to_map(&self) -> WireMap {
        match self {
            BridgeMessage::Request(request) => request.to_map(),
            BridgeMessage::Response(response) => response.to_map(),
            BridgeMessage::Event(event) => event.to_map(),
            BridgeMessage::Unknown(message) => message.to_map(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BridgeMessage::Request(request) => request.id(),
            BridgeMessage::Response(response) => response.id(),
            BridgeMessage::Event(event) => event.id(),
            BridgeMessage::Unknown(message) => message.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BridgeMessage::Request(request) => request.name(),
            BridgeMessage::Response(response) => response.name(),
            BridgeMessage::Event(event) => event.name(),
            BridgeMessage::Unknown(message) => message.name(),
        }
    }
}

impl From<Request> for BridgeMessage {
    fn from(request: Request) -> Self {
        BridgeMessage::Request(request)
    }
}

impl From<Response> for BridgeMessage {
    fn from(response: Response) -> Self {
        BridgeMessage::Response(response)
    }
}

impl From<Event> for BridgeMessage {
    fn from(event: Event) -> Self {
        BridgeMessage::Event(event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(pairs: &[(&str, Value)]) -> WireMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_kind_tokens() {
        assert_eq!(MessageKind::parse("request"), MessageKind::Request);
        assert_eq!(MessageKind::parse("REQ"), MessageKind::Request);
        assert_eq!(MessageKind::parse("rsp"), MessageKind::Response);
        assert_eq!(MessageKind::parse("Event"), MessageKind::Event);
        assert_eq!(
            MessageKind::parse("stream"),
            MessageKind::Unknown("stream".to_string())
        );
        assert_eq!(MessageKind::Response.as_token(), "response");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::new("com.test.a", MessageKind::Event, None);
        let b = Message::new("com.test.a", MessageKind::Event, None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let message = Message::new(
            "com.test.ping",
            MessageKind::Event,
            Some(Value::object_from_pairs([("n", 1)])),
        );
        assert_eq!(Message::from_map(&message.to_map()).unwrap(), message);

        let empty = Message::with_id("1", "com.test.empty", MessageKind::Event, None);
        let map = empty.to_map();
        assert!(!map.contains_key(KEY_DATA));
        assert_eq!(Message::from_map(&map).unwrap(), empty);
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        for missing in [KEY_ID, KEY_NAME, KEY_TYPE] {
            let mut map = wire(&[
                (KEY_ID, Value::from("1")),
                (KEY_NAME, Value::from("com.test")),
                (KEY_TYPE, Value::from("event")),
            ]);
            map.remove(missing);
            assert!(matches!(
                Message::from_map(&map),
                Err(MessageError::Malformed(_))
            ));
        }

        let map = wire(&[
            (KEY_ID, Value::from(7)),
            (KEY_NAME, Value::from("com.test")),
            (KEY_TYPE, Value::from("event")),
        ]);
        assert!(matches!(
            Message::from_map(&map),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_kind_decodes() {
        let map = wire(&[
            (KEY_ID, Value::from("1")),
            (KEY_NAME, Value::from("com.test")),
            (KEY_TYPE, Value::from("stream")),
        ]);
        let decoded = BridgeMessage::from_map(map.clone()).unwrap();
        assert!(matches!(decoded, BridgeMessage::Unknown(_)));
        assert_eq!(decoded.to_map(), map);
    }

    #[test]
    fn test_json_helpers() {
        let event = Event::new("com.test.json", Some(Value::from("hi")));
        let json = map_to_json(&event.to_map()).unwrap();
        let decoded = BridgeMessage::from_map(map_from_json(&json).unwrap()).unwrap();
        assert_eq!(decoded, BridgeMessage::Event(event.clone()));

        let json = event.to_json().unwrap();
        assert_eq!(Event::from_json(&json).unwrap(), event);

        let message = BridgeMessage::from(event);
        let json = message.to_json().unwrap();
        assert_eq!(BridgeMessage::from_json(&json).unwrap(), message);

        let request = Request::new("com.test.calc.add", Value::object_from_pairs([("a", 2)]));
        let reply = Response::success(&request, Some(Value::from(2)));
        assert_eq!(Request::from_json(&request.to_json().unwrap()).unwrap(), request);
        assert_eq!(Response::from_json(&reply.to_json().unwrap()).unwrap(), reply);

        assert!(matches!(
            map_from_json("[1, 2]"),
            Err(MessageError::Malformed(_))
        ));
    }
}
