//! Sending side of one link direction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bridge_runtime::{Counterpart, CounterpartError, Transceiver};
use bridge_types::{WireMap, map_to_json};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::LinkCommand;
use crate::error::LinkError;
use crate::worker::run_worker;

/// Handle feeding one peer transceiver
///
/// Installed as the [`Counterpart`] of the other side. Delivery never blocks:
/// frames go onto an unbounded channel and the worker task hands them to the
/// peer in order.
pub struct LinkHandle {
    name: String,
    cmd_tx: mpsc::UnboundedSender<LinkCommand>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
    delivered: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LinkHandle {
    /// Spawn a worker delivering into `peer` on the current tokio runtime
    pub fn spawn(name: impl Into<String>, peer: &Transceiver) -> Result<Self, LinkError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let name = name.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let delivered = Arc::new(AtomicU64::new(0));

        let task = runtime.spawn(run_worker(
            name.clone(),
            peer.downgrade(),
            Arc::clone(&delivered),
            cmd_rx,
            shutdown_rx,
        ));

        tracing::debug!("[link:{}] Spawned", name);
        Ok(Self {
            name,
            cmd_tx,
            shutdown_tx,
            closed: AtomicBool::new(false),
            delivered,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, cmd: LinkCommand) -> Result<(), LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        self.cmd_tx.send(cmd).map_err(|_| LinkError::Closed)
    }

    /// Encode `message` and queue it for the peer
    pub fn send_frame(&self, message: &WireMap) -> Result<(), LinkError> {
        let json = map_to_json(message)?;
        self.send(LinkCommand::Frame(json))
    }

    /// Tell the peer that this side is ready to receive
    pub fn announce_ready(&self) -> Result<(), LinkError> {
        self.send(LinkCommand::Ready)
    }

    /// Frames the peer accepted so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop after delivering everything already queued
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.cmd_tx.send(LinkCommand::Shutdown);
        tracing::debug!("[link:{}] Closed", self.name);
    }

    /// Stop immediately, dropping queued frames
    pub fn abort(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the worker to finish. Call [`close`](Self::close) first.
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("[link:{}] Worker ended abnormally: {}", self.name, e);
            }
        }
    }
}

impl Counterpart for LinkHandle {
    fn deliver(&self, message: WireMap) -> Result<(), CounterpartError> {
        self.send_frame(&message)
            .map_err(|e| CounterpartError(e.to_string()))
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
