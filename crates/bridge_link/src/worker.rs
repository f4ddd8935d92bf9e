//! Worker task delivering frames into the peer transceiver.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bridge_runtime::WeakTransceiver;
use bridge_types::map_from_json;
use tokio::sync::{mpsc, watch};

use crate::command::LinkCommand;

/// Receive loop for one direction of the link
///
/// Holds the peer weakly: once every owner of the peer transceiver is gone the
/// worker drops frames and exits.
pub(crate) async fn run_worker(
    name: String,
    peer: WeakTransceiver,
    delivered: Arc<AtomicU64>,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!("[link:{}] Worker started", name);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!("[link:{}] Received shutdown signal", name);
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!("[link:{}] Command channel closed", name);
                    break;
                };
                let Some(bridge) = peer.upgrade() else {
                    tracing::debug!("[link:{}] Peer transceiver dropped", name);
                    break;
                };

                match cmd {
                    LinkCommand::Frame(json) => {
                        let map = match map_from_json(&json) {
                            Ok(map) => map,
                            Err(e) => {
                                tracing::warn!("[link:{}] Dropping undecodable frame: {}", name, e);
                                continue;
                            }
                        };
                        if let Err(e) = bridge.receive_message(map) {
                            tracing::warn!("[link:{}] Peer rejected frame: {}", name, e);
                            continue;
                        }
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    LinkCommand::Ready => {
                        tracing::debug!("[link:{}] Peer notified of readiness", name);
                        bridge.on_counterpart_ready();
                    }
                    LinkCommand::Shutdown => {
                        tracing::debug!("[link:{}] Shutdown requested", name);
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("[link:{}] Worker stopped", name);
}
