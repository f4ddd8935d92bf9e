// BridgeHolder - access point usable before the transceiver exists
//
// Every call either forwards to the installed transceiver or is captured as a
// closure and replayed, in call order, once `set_bridge` installs one.

use std::collections::VecDeque;
use std::sync::Arc;

use bridge_types::{Event, Request, RequestBuilder, Response};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::constants::ConstantsProvider;
use crate::error::BridgeResult;
use crate::handler::{EventListener, RequestHandler};
use crate::registry::SubscriptionId;
use crate::transaction::{Completion, PendingResponse};
use crate::transceiver::Transceiver;

type PendingCall = Box<dyn FnOnce(&Transceiver) + Send>;

#[derive(Default)]
struct HolderState {
    bridge: Option<Transceiver>,
    queue: VecDeque<PendingCall>,
    /// Used for requests built before a bridge is installed
    config: BridgeConfig,
}

/// Cloneable, injectable handle to the bridge
#[derive(Clone, Default)]
pub struct BridgeHolder {
    state: Arc<Mutex<HolderState>>,
}

impl BridgeHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let holder = Self::default();
        holder.state.lock().config = config;
        holder
    }

    /// Run `call` now if a bridge is installed, otherwise queue it
    ///
    /// Returns `None` when the call was queued.
    fn forward<R>(
        &self,
        label: &'static str,
        call: impl FnOnce(&Transceiver) -> R + Send + 'static,
    ) -> Option<R> {
        let bridge = {
            let mut state = self.state.lock();
            match &state.bridge {
                Some(bridge) => bridge.clone(),
                None => {
                    state.queue.push_back(Box::new(move |bridge: &Transceiver| {
                        let _ = call(bridge);
                    }));
                    debug!(call = label, queued = state.queue.len(), "No bridge installed, queuing call");
                    return None;
                }
            }
        };
        Some(call(&bridge))
    }

    /// Install `bridge`, replaying queued calls in their original order
    ///
    /// Calls made while the replay runs are appended to the queue and replayed
    /// too; direct forwarding only starts once the queue is empty.
    pub fn set_bridge(&self, bridge: Transceiver) {
        info!(runtime = %bridge.runtime(), queued = self.queued_calls(), "Installing bridge");
        let mut replayed = 0usize;
        loop {
            let call = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(call) => call,
                    None => {
                        if state.bridge.is_some() {
                            warn!("Replacing an already installed bridge");
                        }
                        state.bridge = Some(bridge);
                        break;
                    }
                }
            };
            call(&bridge);
            replayed += 1;
        }
        debug!(replayed, "Bridge installed");
    }

    pub fn bridge(&self) -> Option<Transceiver> {
        self.state.lock().bridge.clone()
    }

    pub fn is_installed(&self) -> bool {
        self.state.lock().bridge.is_some()
    }

    /// Calls waiting for a bridge
    pub fn queued_calls(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Uninstall the bridge and drop queued calls
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.bridge = None;
        state.queue.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Forwarded Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Request builder using the installed bridge's timeout, or the holder's
    /// own before installation
    pub fn request(&self, name: impl Into<String>) -> RequestBuilder {
        let state = self.state.lock();
        let config = state.bridge.as_ref().map_or(&state.config, |bridge| bridge.config());
        Request::builder(name).timeout(config.request_timeout())
    }

    pub fn send_event(&self, event: Event) {
        self.forward("send_event", move |bridge| bridge.send_event(event));
    }

    pub fn send_request(&self, request: Request) -> PendingResponse {
        let (completion, pending) = Completion::channel(&request);
        self.forward("send_request", move |bridge| {
            bridge.send_request_with_completion(request, completion)
        });
        pending
    }

    pub fn send_request_with(
        &self,
        request: Request,
        callback: impl FnOnce(Response) + Send + 'static,
    ) {
        self.forward("send_request_with", move |bridge| {
            bridge.send_request_with(request, callback)
        });
    }

    /// Register a request handler
    ///
    /// Before installation the subscription id is returned immediately; a
    /// duplicate found during replay is logged by the registry and dropped.
    pub fn register_request_handler<H: RequestHandler>(
        &self,
        name: impl Into<String>,
        handler: H,
    ) -> BridgeResult<SubscriptionId> {
        let name = name.into();
        let id = SubscriptionId::new();
        let handler: Arc<dyn RequestHandler> = Arc::new(handler);
        self.forward("register_request_handler", move |bridge| {
            bridge.register_request_handler_with_id(&name, id, handler)
        })
        .unwrap_or(Ok(()))?;
        Ok(id)
    }

    /// Returns `None` when no handler was registered under `id` or when the
    /// call was queued
    pub fn unregister_request_handler(&self, id: SubscriptionId) -> Option<Arc<dyn RequestHandler>> {
        self.forward("unregister_request_handler", move |bridge| {
            bridge.unregister_request_handler(id)
        })
        .flatten()
    }

    pub fn register_event_listener<L: EventListener>(
        &self,
        name: impl Into<String>,
        listener: L,
    ) -> SubscriptionId {
        let name = name.into();
        let id = SubscriptionId::new();
        let listener: Arc<dyn EventListener> = Arc::new(listener);
        self.forward("register_event_listener", move |bridge| {
            bridge.register_event_listener_with_id(&name, id, listener)
        });
        id
    }

    pub fn unregister_event_listener(&self, id: SubscriptionId) -> Option<Arc<dyn EventListener>> {
        self.forward("unregister_event_listener", move |bridge| {
            bridge.unregister_event_listener(id)
        })
        .flatten()
    }

    pub fn add_constants_provider<P: ConstantsProvider>(&self, provider: P) {
        let provider: Arc<dyn ConstantsProvider> = Arc::new(provider);
        self.forward("add_constants_provider", move |bridge| {
            bridge.add_constants_provider_shared(provider)
        });
    }
}

#[cfg(test)]
mod tests {
    use bridge_types::{BridgeMessage, FailureMessage, Runtime, Value};

    use super::*;
    use crate::constants::StaticConstants;
    use crate::counterpart::RecordingCounterpart;
    use crate::handler::{handler_fn, listener_fn};

    fn ready_bridge() -> (Transceiver, Arc<RecordingCounterpart>) {
        let bridge = Transceiver::new(Runtime::Native);
        let counterpart = RecordingCounterpart::new_shared();
        bridge.set_counterpart(counterpart.clone());
        bridge.on_counterpart_ready();
        (bridge, counterpart)
    }

    #[tokio::test]
    async fn test_events_queued_before_install_keep_order() {
        let holder = BridgeHolder::new();
        let events: Vec<Event> = (0..3)
            .map(|n| Event::with_data("com.test.step", n))
            .collect();
        for event in &events {
            holder.send_event(event.clone());
        }
        assert_eq!(holder.queued_calls(), 3);

        let (bridge, counterpart) = ready_bridge();
        holder.set_bridge(bridge);

        let delivered: Vec<String> = counterpart
            .take()
            .into_iter()
            .map(|map| BridgeMessage::from_map(map).unwrap().id().to_string())
            .collect();
        let expected: Vec<String> = events.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(delivered, expected);
        assert_eq!(holder.queued_calls(), 0);
    }

    #[test]
    fn test_calls_racing_the_replay_keep_order() {
        use std::sync::Barrier;
        use std::thread;

        let (bridge, counterpart) = ready_bridge();
        // Two rendezvous: the replay has entered the listener, then may leave it
        let gate = Arc::new(Barrier::new(2));
        let held = Arc::clone(&gate);
        bridge.register_event_listener(
            "com.test.gate",
            listener_fn(move |_| {
                held.wait();
                held.wait();
            }),
        );

        let holder = BridgeHolder::new();
        let first = Event::new("com.test.gate", None);
        holder.send_event(first.clone());

        let installer = {
            let holder = holder.clone();
            thread::spawn(move || holder.set_bridge(bridge))
        };

        gate.wait();
        let racing: Vec<Event> = (0..3)
            .map(|n| Event::with_data("com.test.step", n))
            .collect();
        for event in &racing {
            holder.send_event(event.clone());
        }
        assert_eq!(holder.queued_calls(), 3);
        assert!(!holder.is_installed());
        gate.wait();
        installer.join().unwrap();

        let delivered: Vec<String> = counterpart
            .take()
            .into_iter()
            .map(|map| BridgeMessage::from_map(map).unwrap().id().to_string())
            .collect();
        let expected: Vec<String> = std::iter::once(&first)
            .chain(&racing)
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(delivered, expected);
        assert!(holder.is_installed());
        assert_eq!(holder.queued_calls(), 0);
    }

    #[tokio::test]
    async fn test_registration_before_install() {
        let holder = BridgeHolder::new();
        let id = holder
            .register_request_handler(
                "com.test.echo",
                handler_fn(|request| Ok(request.data().cloned())),
            )
            .unwrap();
        let pending = holder.send_request(Request::new("com.test.echo", "hi"));

        let (bridge, _counterpart) = ready_bridge();
        holder.set_bridge(bridge.clone());

        assert_eq!(bridge.request_handler_id("com.test.echo"), Some(id));
        let response = pending.await;
        assert_eq!(response.data(), Some(&Value::from("hi")));
    }

    #[tokio::test]
    async fn test_duplicate_on_replay_keeps_first() {
        let holder = BridgeHolder::new();
        let first = holder
            .register_request_handler("com.test.echo", handler_fn(|_| Ok(Some(Value::from(1)))))
            .unwrap();
        let second = holder
            .register_request_handler("com.test.echo", handler_fn(|_| Ok(Some(Value::from(2)))))
            .unwrap();
        assert_ne!(first, second);

        let (bridge, _counterpart) = ready_bridge();
        holder.set_bridge(bridge.clone());
        assert_eq!(bridge.request_handler_id("com.test.echo"), Some(first));

        // Once installed the duplicate surfaces directly
        let err = holder.register_request_handler("com.test.echo", handler_fn(|_| Ok(None)));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_forwards_directly_once_installed() {
        let holder = BridgeHolder::new();
        let (bridge, _counterpart) = ready_bridge();
        holder.set_bridge(bridge.clone());
        assert!(holder.is_installed());

        let id = holder.register_event_listener("com.test.tick", listener_fn(|_| {}));
        assert_eq!(bridge.event_listener_ids("com.test.tick"), vec![id]);
        assert!(holder.unregister_event_listener(id).is_some());
        assert_eq!(holder.queued_calls(), 0);

        holder.add_constants_provider(StaticConstants(
            [("platform".to_string(), Value::from("linux"))].into_iter().collect(),
        ));
        assert_eq!(bridge.constants().get("platform"), Some(&Value::from("linux")));
    }

    #[tokio::test]
    async fn test_queued_unregister_returns_none() {
        let holder = BridgeHolder::new();
        let id = holder.register_event_listener("com.test.tick", listener_fn(|_| {}));
        assert!(holder.unregister_event_listener(id).is_none());

        let (bridge, _counterpart) = ready_bridge();
        holder.set_bridge(bridge.clone());
        assert!(bridge.event_listener_ids("com.test.tick").is_empty());
    }

    #[tokio::test]
    async fn test_callback_request_through_holder() {
        let holder = BridgeHolder::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        holder.send_request_with(
            Request::builder("com.test.missing")
                .dispatch_mode(bridge_types::DispatchMode::NativeOnly)
                .build(),
            move |response| {
                let _ = tx.send(response);
            },
        );

        let (bridge, _counterpart) = ready_bridge();
        holder.set_bridge(bridge);

        let response = rx.await.unwrap();
        assert!(response.failure_message().is_some_and(FailureMessage::is_no_handler));
    }

    #[tokio::test]
    async fn test_reset_uninstalls() {
        let holder = BridgeHolder::new();
        holder.send_event(Event::new("com.test.tick", None));
        holder.reset();
        assert_eq!(holder.queued_calls(), 0);

        let (bridge, _counterpart) = ready_bridge();
        holder.set_bridge(bridge);
        holder.reset();
        assert!(!holder.is_installed());
        assert!(holder.bridge().is_none());
    }
}
