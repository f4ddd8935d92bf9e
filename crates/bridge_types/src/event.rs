//! Broadcast events.

use std::fmt;

use crate::error::MessageError;
use crate::message::{Message, MessageKind, WireMap};
use crate::value::Value;

/// A broadcast message with zero or more listeners and no response
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    message: Message,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            message: Message::new(name, MessageKind::Event, data),
        }
    }

    /// Event with a payload
    pub fn with_data(name: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(name, Some(data.into()))
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

    pub fn from_map(map: WireMap) -> Result<Self, MessageError> {
        let message = Message::from_map(&map)?;
        message.expect_kind(MessageKind::Event)?;
        Ok(Self { message })
    }

    pub fn to_map(&self) -> WireMap {
        self.message.to_map()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event(id={}, name={})", self.id(), self.name())
    }
}
