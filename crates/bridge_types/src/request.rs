//! Requests and the dispatch policy deciding which runtime may answer them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MessageError;
use crate::message::{Message, MessageKind, WireMap};
use crate::value::Value;

pub const KEY_TIMEOUT: &str = "timeout";
pub const KEY_DISPATCH_MODE: &str = "dispatchMode";

/// Timeout applied to locally built requests unless overridden
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Longest timeout a wire map can carry; longer ones are clamped to it
pub const MAX_REQUEST_TIMEOUT_MS: u64 = i64::MAX.unsigned_abs();

// ─────────────────────────────────────────────────────────────────────────────
// Runtime & Dispatch Mode
// ─────────────────────────────────────────────────────────────────────────────

/// The two runtimes joined by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Native,
    Js,
}

impl Runtime {
    /// The runtime on the other side of the bridge
    pub fn counterpart(self) -> Runtime {
        match self {
            Runtime::Native => Runtime::Js,
            Runtime::Js => Runtime::Native,
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runtime::Native => write!(f, "native"),
            Runtime::Js => write!(f, "js"),
        }
    }
}

/// Which runtime(s) may claim a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DispatchMode {
    NativeOnly,
    JsOnly,
    #[default]
    NativeAndJs,
}

impl DispatchMode {
    /// Whether a handler living in `runtime` may answer
    pub fn permits(self, runtime: Runtime) -> bool {
        match self {
            DispatchMode::NativeOnly => runtime == Runtime::Native,
            DispatchMode::JsOnly => runtime == Runtime::Js,
            DispatchMode::NativeAndJs => true,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            DispatchMode::NativeOnly => "native",
            DispatchMode::JsOnly => "js",
            DispatchMode::NativeAndJs => "both",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "native" => Some(DispatchMode::NativeOnly),
            "js" => Some(DispatchMode::JsOnly),
            "both" => Some(DispatchMode::NativeAndJs),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// A request expecting exactly one correlated response
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    message: Message,
    dispatch_mode: DispatchMode,
    timeout_ms: Option<u64>,
}

impl Request {
    /// Start building a request with the default timeout and dispatch mode
    pub fn builder(name: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(name)
    }

    /// Shorthand for a request with data and defaults for everything else
    pub fn new(name: impl Into<String>, data: impl Into<Value>) -> Self {
        RequestBuilder::new(name).data(data).build()
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

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    /// `None` means the request never times out
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Parse a request from its wire map
    ///
    /// A missing `timeout` key means the receiver does not time the request
    /// out; the sender tracks its own deadline.
    pub fn from_map(map: WireMap) -> Result<Self, MessageError> {
        let message = Message::from_map(&map)?;
        message.expect_kind(MessageKind::Request)?;

        let timeout_ms = match map.get(KEY_TIMEOUT) {
            None => None,
            Some(Value::Int(ms)) if *ms >= 0 => Some(ms.unsigned_abs()),
            Some(other) => {
                return Err(MessageError::Malformed(format!(
                    "field `{KEY_TIMEOUT}` must be a non-negative integer, got {}",
                    other.type_name()
                )));
            }
        };

        let dispatch_mode = match map.get(KEY_DISPATCH_MODE) {
            None => DispatchMode::default(),
            Some(Value::String(token)) => DispatchMode::parse(token).ok_or_else(|| {
                MessageError::Malformed(format!("unknown dispatch mode `{token}`"))
            })?,
            Some(_) => return Err(MessageError::Malformed(format!(
                "field `{KEY_DISPATCH_MODE}` must be a string"
            ))),
        };

        Ok(Self {
            message,
            dispatch_mode,
            timeout_ms,
        })
    }

    pub fn to_map(&self) -> WireMap {
        let mut map = self.message.to_map();
        if let Some(ms) = self.timeout_ms {
            map.insert(
                KEY_TIMEOUT.to_string(),
                Value::Int(i64::try_from(ms).unwrap_or(i64::MAX)),
            );
        }
        if self.dispatch_mode != DispatchMode::default() {
            map.insert(
                KEY_DISPATCH_MODE.to_string(),
                Value::from(self.dispatch_mode.as_token()),
            );
        }
        map
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request(id={}, name={})", self.id(), self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Request`]; requests are immutable once built
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    name: String,
    data: Option<Value>,
    dispatch_mode: DispatchMode,
    timeout_ms: Option<u64>,
}

impl RequestBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
            dispatch_mode: DispatchMode::default(),
            timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    /// Set the request payload
    pub fn data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the timeout (millisecond precision, at most
    /// [`MAX_REQUEST_TIMEOUT_MS`])
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms = Some(ms.min(MAX_REQUEST_TIMEOUT_MS));
        self
    }

    /// Never time this request out
    pub fn no_timeout(mut self) -> Self {
        self.timeout_ms = None;
        self
    }

    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn build(self) -> Request {
        Request {
            message: Message::new(self.name, MessageKind::Request, self.data),
            dispatch_mode: self.dispatch_mode,
            timeout_ms: self.timeout_ms,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::KEY_TYPE;

    #[test]
    fn test_builder_defaults() {
        let request = Request::builder("com.test.calc").build();
        assert_eq!(request.dispatch_mode(), DispatchMode::NativeAndJs);
        assert_eq!(
            request.timeout(),
            Some(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
        );
        assert_eq!(request.data(), None);
        assert_eq!(request.message().kind(), &MessageKind::Request);
    }

    #[test]
    fn test_dispatch_mode_permits() {
        assert!(DispatchMode::NativeOnly.permits(Runtime::Native));
        assert!(!DispatchMode::NativeOnly.permits(Runtime::Js));
        assert!(DispatchMode::JsOnly.permits(Runtime::Js));
        assert!(DispatchMode::NativeAndJs.permits(Runtime::Js));
        assert_eq!(Runtime::Native.counterpart(), Runtime::Js);
    }

    #[test]
    fn test_roundtrip_keeps_policy() {
        let request = Request::builder("com.test.calc.add")
            .data(Value::object_from_pairs([("a", 2), ("b", 3)]))
            .timeout(Duration::from_millis(250))
            .dispatch_mode(DispatchMode::JsOnly)
            .build();

        let map = request.to_map();
        assert_eq!(map.get(KEY_TIMEOUT), Some(&Value::Int(250)));
        assert_eq!(map.get(KEY_DISPATCH_MODE), Some(&Value::from("js")));
        assert_eq!(Request::from_map(map).unwrap(), request);

        let untimed = Request::builder("com.test.wait").no_timeout().build();
        let map = untimed.to_map();
        assert!(!map.contains_key(KEY_TIMEOUT));
        assert!(!map.contains_key(KEY_DISPATCH_MODE));
        assert_eq!(Request::from_map(map).unwrap(), untimed);
    }

    #[test]
    fn test_huge_timeout_is_clamped_and_roundtrips() {
        for timeout in [Duration::from_millis(u64::MAX), Duration::MAX] {
            let request = Request::builder("com.test.wait").timeout(timeout).build();
            assert_eq!(
                request.timeout(),
                Some(Duration::from_millis(MAX_REQUEST_TIMEOUT_MS))
            );

            let map = request.to_map();
            assert_eq!(map.get(KEY_TIMEOUT), Some(&Value::Int(i64::MAX)));
            assert_eq!(Request::from_map(map).unwrap(), request);
        }
    }

    #[test]
    fn test_kind_mismatch() {
        let mut map = Request::new("com.test", 1).to_map();
        map.insert(KEY_TYPE.to_string(), Value::from("event"));
        assert!(matches!(
            Request::from_map(map),
            Err(MessageError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_policy_fields() {
        let mut map = Request::new("com.test", 1).to_map();
        map.insert(KEY_TIMEOUT.to_string(), Value::from("soon"));
        assert!(matches!(
            Request::from_map(map),
            Err(MessageError::Malformed(_))
        ));

        let mut map = Request::new("com.test", 1).to_map();
        map.insert(KEY_DISPATCH_MODE.to_string(), Value::from("everywhere"));
        assert!(matches!(
            Request::from_map(map),
            Err(MessageError::Malformed(_))
        ));
    }
}
