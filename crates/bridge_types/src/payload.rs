//! Conversion between typed API payloads and [`Value`].
//!
//! Generated payload types stay opaque to the bridge. Anything that derives
//! `Serialize` and `Deserialize` gets the conversion for free.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::MessageError;
use crate::value::Value;

/// A type that can travel as a message payload
pub trait Payload: Sized {
    fn to_value(&self) -> Result<Value, MessageError>;
    fn from_value(value: Value) -> Result<Self, MessageError>;
}

impl<T> Payload for T
where
    T: Serialize + DeserializeOwned,
{
    fn to_value(&self) -> Result<Value, MessageError> {
        serde_json::to_value(self)
            .map(Value::from)
            .map_err(|e| MessageError::Payload(e.to_string()))
    }

    fn from_value(value: Value) -> Result<Self, MessageError> {
        serde_json::from_value(serde_json::Value::from(value))
            .map_err(|e| MessageError::Payload(e.to_string()))
    }
}
