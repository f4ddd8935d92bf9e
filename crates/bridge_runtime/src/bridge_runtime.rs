//! Bridge Runtime - the message bus shared by the native host and the script runtime
//!
//! Each runtime owns one [`Transceiver`]. A transceiver keeps the request
//! handler and event listener registries for its side, tracks outstanding
//! requests until their single response arrives, and talks to the other side
//! through a [`Counterpart`]. Outbound traffic is buffered until the
//! counterpart reports ready.
//!
//! [`BridgeHolder`] is the handle application code uses: it accepts calls
//! before any transceiver exists and replays them in order once one is
//! installed.

pub mod config;
pub mod constants;
pub mod counterpart;
pub mod error;
pub mod handler;
pub mod holder;
pub mod registry;
pub mod transaction;
pub mod transceiver;
pub mod typed;

pub use config::BridgeConfig;
pub use constants::{ConstantsProvider, ConstantsRegistry, StaticConstants};
pub use counterpart::{Counterpart, RecordingCounterpart};
pub use error::{BoxError, BridgeError, BridgeResult, CounterpartError};
pub use handler::{
    AsyncRequestHandler, EventListener, HandlerResult, RequestHandler, Responder, async_handler,
    deferred_fn, handler_fn, listener_fn,
};
pub use holder::BridgeHolder;
pub use registry::{EventRegistry, RequestRegistry, SubscriptionId};
pub use transaction::{Completion, PendingResponse, TransactionTracker};
pub use transceiver::{Readiness, Transceiver, WeakTransceiver};
pub use typed::{MessageSender, emit_typed, handle_typed, listen_typed, send_typed};

// Re-export the message types so dependents need only this crate
pub use bridge_types;
