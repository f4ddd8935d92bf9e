//! Error types for the in-process link.

use bridge_types::MessageError;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Link is closed")]
    Closed,

    #[error("Link needs a tokio runtime to run its worker")]
    NoRuntime,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] MessageError),
}
