//! Bridge Types - Message definitions shared by both runtimes
//!
//! This crate contains the pure data structures that cross the bridge between
//! the native host and the embedded script runtime: the payload [`Value`],
//! the message envelope and its request/response/event forms, and the
//! wire-map codec. It has no runtime behaviour of its own.

mod error;
mod event;
mod message;
mod payload;
mod request;
mod response;
mod value;

pub use error::*;
pub use event::*;
pub use message::*;
pub use payload::*;
pub use request::*;
pub use response::*;
pub use value::*;
