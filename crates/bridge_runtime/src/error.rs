//! Error types for the bridge runtime.

use bridge_types::MessageError;

use crate::registry::SubscriptionId;

/// Errors returned synchronously by bridge operations
///
/// Dispatch-time failures (no handler, timeout) are never returned here; they
/// reach the caller as a failed [`bridge_types::Response`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("A request handler is already registered for {name}")]
    DuplicateHandler { name: String },

    #[error("Subscription {id} is already registered")]
    DuplicateSubscription { id: SubscriptionId },

    #[error("No pending transaction for response {id}")]
    UnknownTransaction { id: String },

    #[error("A transaction is already pending for request {id}")]
    DuplicateTransaction { id: String },

    #[error(transparent)]
    Malformed(#[from] MessageError),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Raised by a [`crate::Counterpart`] that cannot take a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Counterpart unavailable: {0}")]
pub struct CounterpartError(pub String);

/// Error type returned by event listeners and constants providers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
