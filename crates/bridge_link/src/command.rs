//! Commands sent to a link worker.

/// What a link worker does next
pub(crate) enum LinkCommand {
    /// A JSON-encoded wire map to hand to the peer transceiver
    Frame(String),

    /// The sending side finished starting up; the peer may flush its queue
    Ready,

    /// Stop the worker. Frames sent before this are still delivered.
    Shutdown,
}
