//! Bridge Link
//!
//! In-process transport between two transceivers, one per runtime. Each
//! direction is a [`LinkHandle`] installed as the sending side's counterpart:
//! messages are encoded to JSON, pushed onto an unbounded channel and handed
//! to the peer by a worker task, the way a real embedding crosses a
//! string-only boundary.
//!
//! # Architecture
//!
//! - `native.set_counterpart(to_script)`, `script.set_counterpart(to_native)`
//! - Each worker holds its peer weakly and calls `receive_message`
//! - `handshake()` sends a ready signal both ways so queued traffic drains

mod command;
mod error;
mod handle;
mod worker;

use std::sync::Arc;

use bridge_runtime::Transceiver;

pub use error::LinkError;
pub use handle::LinkHandle;

/// Both directions of a link between a native and a script transceiver
pub struct LinkPair {
    to_native: Arc<LinkHandle>,
    to_script: Arc<LinkHandle>,
}

/// Wire `native` and `script` to each other
///
/// Neither side becomes ready until [`LinkPair::handshake`] (or one of the
/// one-way `announce_*` calls) runs.
pub fn connect(native: &Transceiver, script: &Transceiver) -> Result<LinkPair, LinkError> {
    let to_script = Arc::new(LinkHandle::spawn(
        format!("{}->{}", native.runtime(), script.runtime()),
        script,
    )?);
    let to_native = Arc::new(LinkHandle::spawn(
        format!("{}->{}", script.runtime(), native.runtime()),
        native,
    )?);

    native.set_counterpart(to_script.clone());
    script.set_counterpart(to_native.clone());
    tracing::info!("Linked {} and {} transceivers", native.runtime(), script.runtime());

    Ok(LinkPair {
        to_native,
        to_script,
    })
}

impl LinkPair {
    /// Carries traffic into the native transceiver
    pub fn to_native(&self) -> &LinkHandle {
        &self.to_native
    }

    /// Carries traffic into the script transceiver
    pub fn to_script(&self) -> &LinkHandle {
        &self.to_script
    }

    /// The script side finished loading: the native side may flush
    pub fn announce_script_ready(&self) -> Result<(), LinkError> {
        self.to_native.announce_ready()
    }

    /// The native side is up: the script side may flush
    pub fn announce_native_ready(&self) -> Result<(), LinkError> {
        self.to_script.announce_ready()
    }

    /// Mark both sides ready
    pub fn handshake(&self) -> Result<(), LinkError> {
        self.announce_native_ready()?;
        self.announce_script_ready()
    }

    /// Close both directions after in-flight frames are delivered and wait
    /// for the workers to stop
    pub async fn shutdown(&self) {
        self.to_script.close();
        self.to_native.close();
        self.to_script.join().await;
        self.to_native.join().await;
    }
}
