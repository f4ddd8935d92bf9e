// Transceiver - the bus core for one runtime
//
// Routes requests to a local handler or across the bridge according to their
// dispatch mode, broadcasts events to local listeners and the counterpart, and
// tracks outstanding requests until their single response arrives.
//
// Outbound traffic is buffered until the counterpart signals readiness. The
// drain and every later send go through the same lock, so buffered messages
// always leave first and in order.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use bridge_types::{
    BridgeMessage, Event, FailureMessage, Map, Request, RequestBuilder, Response, Runtime,
    WireMap, codes,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::constants::{ConstantsProvider, ConstantsRegistry};
use crate::counterpart::Counterpart;
use crate::error::{BridgeError, BridgeResult};
use crate::handler::{self, EventListener, RequestHandler};
use crate::registry::{EventRegistry, RequestRegistry, SubscriptionId};
use crate::transaction::{Completion, PendingResponse, TransactionTracker};

/// Whether the counterpart has completed its startup handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    Ready,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound Queue
// ─────────────────────────────────────────────────────────────────────────────

enum Outbound {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl Outbound {
    fn to_map(&self) -> WireMap {
        match self {
            Outbound::Request(request) => request.to_map(),
            Outbound::Response(response) => response.to_map(),
            Outbound::Event(event) => event.to_map(),
        }
    }

    fn id(&self) -> &str {
        match self {
            Outbound::Request(request) => request.id(),
            Outbound::Response(response) => response.id(),
            Outbound::Event(event) => event.id(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Outbound::Request(request) => request.name(),
            Outbound::Response(response) => response.name(),
            Outbound::Event(event) => event.name(),
        }
    }
}

struct OutboundState {
    ready: bool,
    queue: VecDeque<Outbound>,
    counterpart: Option<Arc<dyn Counterpart>>,
}

/// A request that could not cross the bridge, with the failure to complete it
type Undelivered = (Request, FailureMessage);

/// Hand one message to the counterpart. Called with the outbound lock held.
fn deliver(counterpart: Option<&dyn Counterpart>, message: Outbound) -> Option<Undelivered> {
    let Some(counterpart) = counterpart else {
        return match message {
            Outbound::Request(request) => {
                let failure = FailureMessage::no_handler(request.name());
                Some((request, failure))
            }
            Outbound::Event(event) => {
                debug!(id = %event.id(), name = %event.name(), "No counterpart attached, event stays local");
                None
            }
            Outbound::Response(response) => {
                warn!(id = %response.id(), name = %response.name(), "No counterpart attached, dropping response");
                None
            }
        };
    };

    match counterpart.deliver(message.to_map()) {
        Ok(()) => {
            debug!(id = %message.id(), name = %message.name(), "Delivered to counterpart");
            None
        }
        Err(e) => match message {
            Outbound::Request(request) => {
                warn!(id = %request.id(), name = %request.name(), error = %e, "Counterpart rejected request");
                Some((request, FailureMessage::new(codes::COUNTERPART, e.to_string())))
            }
            other => {
                warn!(id = %other.id(), name = %other.name(), error = %e, "Counterpart rejected message");
                None
            }
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Counterpart,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transceiver
// ─────────────────────────────────────────────────────────────────────────────

type ReadyCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    runtime: Runtime,
    config: BridgeConfig,
    requests: RequestRegistry,
    events: EventRegistry,
    constants: ConstantsRegistry,
    transactions: Arc<TransactionTracker>,
    outbound: Mutex<OutboundState>,
    readiness: watch::Sender<Readiness>,
    ready_callbacks: Mutex<Vec<ReadyCallback>>,
}

/// Message bus for one side of the bridge
///
/// Cheap to clone; all clones share the same registries and queue.
#[derive(Clone)]
pub struct Transceiver {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`Transceiver`]
#[derive(Clone)]
pub struct WeakTransceiver {
    inner: Weak<Inner>,
}

impl WeakTransceiver {
    pub fn upgrade(&self) -> Option<Transceiver> {
        self.inner.upgrade().map(|inner| Transceiver { inner })
    }
}

impl Transceiver {
    /// Create a transceiver living in `runtime` with default settings
    pub fn new(runtime: Runtime) -> Self {
        Self::with_config(runtime, BridgeConfig::default())
    }

    pub fn with_config(runtime: Runtime, config: BridgeConfig) -> Self {
        let (readiness, _) = watch::channel(Readiness::NotReady);
        Self {
            inner: Arc::new(Inner {
                runtime,
                config,
                requests: RequestRegistry::new(),
                events: EventRegistry::new(),
                constants: ConstantsRegistry::new(),
                transactions: TransactionTracker::new_shared(),
                outbound: Mutex::new(OutboundState {
                    ready: false,
                    queue: VecDeque::new(),
                    counterpart: None,
                }),
                readiness,
                ready_callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.inner.runtime
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakTransceiver {
        WeakTransceiver {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Attach the other runtime. Replaces any previous counterpart.
    pub fn set_counterpart(&self, counterpart: Arc<dyn Counterpart>) {
        self.inner.outbound.lock().counterpart = Some(counterpart);
        debug!(runtime = %self.inner.runtime, "Counterpart attached");
    }

    /// Request builder using the configured default timeout
    pub fn request(&self, name: impl Into<String>) -> RequestBuilder {
        Request::builder(name).timeout(self.inner.config.request_timeout())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a request and await its response
    pub fn send_request(&self, request: Request) -> PendingResponse {
        let (completion, pending) = Completion::channel(&request);
        self.send_request_with_completion(request, completion);
        pending
    }

    /// Send a request, running `callback` with its response
    pub fn send_request_with(
        &self,
        request: Request,
        callback: impl FnOnce(Response) + Send + 'static,
    ) {
        self.send_request_with_completion(request, Completion::callback(callback));
    }

    pub(crate) fn send_request_with_completion(&self, request: Request, completion: Completion) {
        debug!(id = %request.id(), name = %request.name(), runtime = %self.inner.runtime, "--> Request");
        self.route_request(request, completion, Origin::Local);
    }

    /// Broadcast an event to local listeners and the counterpart
    pub fn send_event(&self, event: Event) {
        debug!(id = %event.id(), name = %event.name(), runtime = %self.inner.runtime, "--> Event");
        self.notify_listeners(&event);
        self.send_outbound(Outbound::Event(event));
    }

    fn route_request(&self, request: Request, completion: Completion, origin: Origin) {
        if let Err(e) = self.inner.transactions.open(request.clone(), completion) {
            warn!(id = %request.id(), name = %request.name(), error = %e, "Dropping request");
            return;
        }

        let mode = request.dispatch_mode();
        // The counterpart already applied the dispatch mode before forwarding
        let local_permitted = origin == Origin::Counterpart || mode.permits(self.inner.runtime);
        if local_permitted {
            if let Some(found) = self.inner.requests.lookup(request.name()) {
                let bridge = self.downgrade();
                handler::dispatch_request(
                    found.as_ref(),
                    request,
                    Box::new(move |response| {
                        if let Some(bridge) = bridge.upgrade() {
                            bridge.complete_transaction(response);
                        }
                    }),
                );
                return;
            }
        }

        if origin == Origin::Local && mode.permits(self.inner.runtime.counterpart()) {
            self.send_outbound(Outbound::Request(request));
            return;
        }

        debug!(id = %request.id(), name = %request.name(), "No permitted handler for request");
        let failure = FailureMessage::no_handler(request.name());
        self.fail_transaction(&request, failure);
    }

    fn send_outbound(&self, message: Outbound) {
        let undelivered = {
            let mut state = self.inner.outbound.lock();
            if state.ready {
                deliver(state.counterpart.as_deref(), message)
            } else {
                debug!(id = %message.id(), name = %message.name(), "Counterpart not ready, queuing");
                state.queue.push_back(message);
                let queued = state.queue.len();
                if let Some(max) = self.inner.config.max_queued_messages {
                    if queued > max {
                        warn!(queued, max, "Outbound queue is over its soft limit");
                    }
                }
                None
            }
        };

        if let Some((request, failure)) = undelivered {
            self.fail_transaction(&request, failure);
        }
    }

    fn complete_transaction(&self, response: Response) {
        let id = response.id().to_string();
        let name = response.name().to_string();
        if self.inner.transactions.complete(&id, response).is_err() {
            warn!(%id, %name, "Dropping response, transaction already completed or timed out");
        }
    }

    fn fail_transaction(&self, request: &Request, failure: FailureMessage) {
        self.complete_transaction(Response::failure(request, failure));
    }

    fn notify_listeners(&self, event: &Event) {
        for listener in self.inner.events.listeners_for(event.name()) {
            handler::notify_listener(listener.as_ref(), event);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receiving
    // ─────────────────────────────────────────────────────────────────────────

    /// Entry point for traffic arriving from the counterpart
    ///
    /// Inbound requests are only ever handled locally; their response goes
    /// back across the bridge. Inbound events reach local listeners only.
    pub fn receive_message(&self, map: WireMap) -> BridgeResult<()> {
        let message = BridgeMessage::from_map(map).map_err(|e| {
            warn!(runtime = %self.inner.runtime, error = %e, "Rejecting malformed inbound message");
            BridgeError::from(e)
        })?;

        match message {
            BridgeMessage::Request(request) => {
                debug!(id = %request.id(), name = %request.name(), runtime = %self.inner.runtime, "<-- Request");
                let bridge = self.downgrade();
                let completion = Completion::callback(move |response| {
                    if let Some(bridge) = bridge.upgrade() {
                        bridge.send_outbound(Outbound::Response(response));
                    }
                });
                self.route_request(request, completion, Origin::Counterpart);
            }
            BridgeMessage::Response(response) => {
                debug!(id = %response.id(), name = %response.name(), runtime = %self.inner.runtime, "<-- Response");
                self.complete_transaction(response);
            }
            BridgeMessage::Event(event) => {
                debug!(id = %event.id(), name = %event.name(), runtime = %self.inner.runtime, "<-- Event");
                self.notify_listeners(&event);
            }
            BridgeMessage::Unknown(message) => {
                warn!(id = %message.id(), name = %message.name(), kind = %message.kind(), "Dropping message of unknown kind");
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Readiness
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark the counterpart ready and flush everything queued so far
    ///
    /// Only the first call has any effect until the next [`reset`](Self::reset).
    pub fn on_counterpart_ready(&self) {
        let undelivered: Vec<Undelivered> = {
            let mut state = self.inner.outbound.lock();
            if state.ready {
                debug!(runtime = %self.inner.runtime, "Counterpart already ready");
                return;
            }
            state.ready = true;

            let queued: Vec<Outbound> = state.queue.drain(..).collect();
            info!(runtime = %self.inner.runtime, drained = queued.len(), "Counterpart ready");
            let counterpart = state.counterpart.clone();
            queued
                .into_iter()
                .filter_map(|message| deliver(counterpart.as_deref(), message))
                .collect()
        };

        for (request, failure) in undelivered {
            self.fail_transaction(&request, failure);
        }

        self.inner.readiness.send_replace(Readiness::Ready);
        let callbacks = std::mem::take(&mut *self.inner.ready_callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    pub fn readiness(&self) -> Readiness {
        *self.inner.readiness.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Resolve once the counterpart is ready
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.readiness.subscribe();
        let _ = rx.wait_for(|state| *state == Readiness::Ready).await;
    }

    /// Run `callback` once the counterpart is ready, immediately if it already is
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.inner.ready_callbacks.lock();
        if self.is_ready() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_request_handler<H: RequestHandler>(
        &self,
        name: impl Into<String>,
        handler: H,
    ) -> BridgeResult<SubscriptionId> {
        let id = SubscriptionId::new();
        self.register_request_handler_with_id(&name.into(), id, Arc::new(handler))?;
        Ok(id)
    }

    pub(crate) fn register_request_handler_with_id(
        &self,
        name: &str,
        id: SubscriptionId,
        handler: Arc<dyn RequestHandler>,
    ) -> BridgeResult<()> {
        self.inner.requests.register(name, id, handler)
    }

    pub fn unregister_request_handler(&self, id: SubscriptionId) -> Option<Arc<dyn RequestHandler>> {
        self.inner.requests.unregister(id)
    }

    pub fn request_handler_id(&self, name: &str) -> Option<SubscriptionId> {
        self.inner.requests.handler_id(name)
    }

    pub fn register_event_listener<L: EventListener>(
        &self,
        name: impl Into<String>,
        listener: L,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        // A fresh id cannot collide; the registry logs if it ever does
        let _ = self.register_event_listener_with_id(&name.into(), id, Arc::new(listener));
        id
    }

    pub(crate) fn register_event_listener_with_id(
        &self,
        name: &str,
        id: SubscriptionId,
        listener: Arc<dyn EventListener>,
    ) -> BridgeResult<()> {
        self.inner.events.register(name, id, listener)
    }

    pub fn unregister_event_listener(&self, id: SubscriptionId) -> Option<Arc<dyn EventListener>> {
        self.inner.events.unregister(id)
    }

    pub fn event_listener_ids(&self, name: &str) -> Vec<SubscriptionId> {
        self.inner.events.listener_ids(name)
    }

    pub fn add_constants_provider<P: ConstantsProvider>(&self, provider: P) {
        self.add_constants_provider_shared(Arc::new(provider));
    }

    pub(crate) fn add_constants_provider_shared(&self, provider: Arc<dyn ConstantsProvider>) {
        self.inner.constants.add(provider);
    }

    /// Constants from every provider, later registrations winning
    pub fn constants(&self) -> Map {
        self.inner.constants.aggregate()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Messages waiting for the counterpart to become ready
    pub fn queued_len(&self) -> usize {
        self.inner.outbound.lock().queue.len()
    }

    pub fn pending_transactions(&self) -> usize {
        self.inner.transactions.len()
    }

    /// Return to a freshly created state
    ///
    /// Clears registries and the outbound queue, fails pending requests with
    /// `EBRIDGERESET` and goes back to NotReady. The counterpart stays attached.
    pub fn reset(&self) {
        info!(runtime = %self.inner.runtime, "Resetting transceiver");
        self.inner.requests.reset();
        self.inner.events.reset();
        self.inner.constants.reset();
        {
            let mut state = self.inner.outbound.lock();
            state.ready = false;
            state.queue.clear();
        }
        self.inner.transactions.reset();
        self.inner.readiness.send_replace(Readiness::NotReady);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
