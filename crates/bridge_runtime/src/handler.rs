// Request handlers, event listeners and the responder handed to handlers
//
// Handlers are synchronous: they receive the request and a `Responder` and may
// answer immediately or hand the responder to another thread or task. Async
// handlers are adapted by spawning onto the current tokio runtime.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use bridge_types::{Event, FailureMessage, Request, Response, Value};
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::BoxError;

/// Outcome a handler produces for a request
pub type HandlerResult = Result<Option<Value>, FailureMessage>;

// ─────────────────────────────────────────────────────────────────────────────
// Handler Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Answers requests for one name
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle `request`, answering through `responder`
    ///
    /// Returning `Err` completes the request with that failure unless the
    /// responder was already used.
    fn on_request(&self, request: Request, responder: Responder) -> Result<(), FailureMessage>;
}

/// Receives every event broadcast under one name
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: &Event) -> Result<(), BoxError>;
}

/// Request handler that answers from async code
#[async_trait]
pub trait AsyncRequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> HandlerResult;
}

// ─────────────────────────────────────────────────────────────────────────────
// Closure Adapters
// ─────────────────────────────────────────────────────────────────────────────

/// Handler answering synchronously from a closure
pub struct FnRequestHandler<F>
where
    F: Fn(&Request) -> HandlerResult + Send + Sync,
{
    func: F,
}

impl<F> FnRequestHandler<F>
where
    F: Fn(&Request) -> HandlerResult + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> RequestHandler for FnRequestHandler<F>
where
    F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
{
    fn on_request(&self, request: Request, responder: Responder) -> Result<(), FailureMessage> {
        let outcome = (self.func)(&request);
        responder.complete(outcome);
        Ok(())
    }
}

/// Handler that receives the responder itself and may answer later
pub struct DeferredRequestHandler<F>
where
    F: Fn(Request, Responder) -> Result<(), FailureMessage> + Send + Sync,
{
    func: F,
}

impl<F> RequestHandler for DeferredRequestHandler<F>
where
    F: Fn(Request, Responder) -> Result<(), FailureMessage> + Send + Sync + 'static,
{
    fn on_request(&self, request: Request, responder: Responder) -> Result<(), FailureMessage> {
        (self.func)(request, responder)
    }
}

/// Runs an [`AsyncRequestHandler`] on the current tokio runtime
pub struct AsyncHandler<H> {
    inner: Arc<H>,
}

impl<H: AsyncRequestHandler> RequestHandler for AsyncHandler<H> {
    fn on_request(&self, request: Request, responder: Responder) -> Result<(), FailureMessage> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| FailureMessage::handler("Async request handler needs a tokio runtime"))?;

        let handler = Arc::clone(&self.inner);
        runtime.spawn(async move {
            let outcome = handler.handle(request).await;
            responder.complete(outcome);
        });
        Ok(())
    }
}

/// Listener backed by a closure
pub struct FnEventListener<F>
where
    F: Fn(&Event) + Send + Sync,
{
    func: F,
}

impl<F> EventListener for FnEventListener<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event) -> Result<(), BoxError> {
        (self.func)(event);
        Ok(())
    }
}

/// Handler from a closure returning the response payload
pub fn handler_fn<F>(func: F) -> FnRequestHandler<F>
where
    F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
{
    FnRequestHandler::new(func)
}

/// Handler from a closure that owns the responder
pub fn deferred_fn<F>(func: F) -> DeferredRequestHandler<F>
where
    F: Fn(Request, Responder) -> Result<(), FailureMessage> + Send + Sync + 'static,
{
    DeferredRequestHandler { func }
}

pub fn async_handler<H: AsyncRequestHandler>(handler: H) -> AsyncHandler<H> {
    AsyncHandler {
        inner: Arc::new(handler),
    }
}

pub fn listener_fn<F>(func: F) -> FnEventListener<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    FnEventListener { func }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responder
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) type ResponseSink = Box<dyn FnOnce(Response) + Send>;

/// Shared between a responder and the dispatcher that created it
///
/// The sink is taken exactly once, whichever side gets there first.
struct SlotState {
    sink: Option<ResponseSink>,
    /// `on_request` is still running
    dispatching: bool,
    /// The responder was dropped unanswered while dispatching
    abandoned: bool,
}

struct ResponderSlot {
    state: Mutex<SlotState>,
}

impl ResponderSlot {
    fn send(&self, response: Response) {
        let sink = self.state.lock().sink.take();
        if let Some(sink) = sink {
            sink(response);
        }
    }

    /// Called from `Responder::drop`. Returns the sink when the responder
    /// should fail the request itself.
    fn abandon(&self) -> Option<ResponseSink> {
        let mut state = self.state.lock();
        if state.sink.is_none() {
            return None;
        }
        if state.dispatching {
            state.abandoned = true;
            return None;
        }
        state.sink.take()
    }

    /// Called by the dispatcher once `on_request` returns
    fn finish_dispatch(&self, failure: Option<FailureMessage>) -> Option<(ResponseSink, FailureMessage)> {
        let mut state = self.state.lock();
        state.dispatching = false;
        let failure = match failure {
            Some(failure) => failure,
            None if state.abandoned => dropped_responder(),
            None => return None,
        };
        state.sink.take().map(|sink| (sink, failure))
    }
}

/// One-shot handle a request handler answers through
///
/// Consumed by [`respond`](Self::respond), [`fail`](Self::fail) or
/// [`complete`](Self::complete). Dropping it without answering completes the
/// request with an `EHANDLER` failure.
pub struct Responder {
    request: Request,
    slot: Arc<ResponderSlot>,
}

impl Responder {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn respond(self, data: Option<Value>) {
        self.complete(Ok(data));
    }

    pub fn fail(self, failure: FailureMessage) {
        self.complete(Err(failure));
    }

    pub fn complete(self, outcome: HandlerResult) {
        let response = Response::for_request(&self.request, outcome);
        self.slot.send(response);
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(sink) = self.slot.abandon() {
            warn!(id = %self.request.id(), name = %self.request.name(), "Responder dropped without answering");
            sink(Response::failure(&self.request, dropped_responder()));
        }
    }
}

fn dropped_responder() -> FailureMessage {
    FailureMessage::handler("Request handler dropped its responder without answering")
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Invoke `handler` for `request`, delivering exactly one response to `sink`
///
/// Handler errors and panics become `EHANDLER` failures.
pub(crate) fn dispatch_request(handler: &dyn RequestHandler, request: Request, sink: ResponseSink) {
    let slot = Arc::new(ResponderSlot {
        state: Mutex::new(SlotState {
            sink: Some(sink),
            dispatching: true,
            abandoned: false,
        }),
    });
    let responder = Responder {
        request: request.clone(),
        slot: Arc::clone(&slot),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        handler.on_request(request.clone(), responder)
    }));

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(failure)) => Some(failure),
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(id = %request.id(), name = %request.name(), %reason, "Request handler panicked");
            Some(FailureMessage::handler(format!("Request handler panicked: {reason}")))
        }
    };

    if let Some((sink, failure)) = slot.finish_dispatch(failure) {
        sink(Response::failure(&request, failure));
    }
}

/// Invoke `listener`, logging rather than propagating its failure
pub(crate) fn notify_listener(listener: &dyn EventListener, event: &Event) {
    match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(id = %event.id(), name = %event.name(), error = %e, "Event listener failed");
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(id = %event.id(), name = %event.name(), %reason, "Event listener panicked");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bridge_types::codes;
    use tokio::sync::oneshot;

    use super::*;

    fn capture() -> (ResponseSink, Arc<Mutex<Vec<Response>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ResponseSink = Box::new(move |response| sink_seen.lock().push(response));
        (sink, seen)
    }

    fn failure_code(response: &Response) -> Option<&str> {
        response.failure_message().map(FailureMessage::code)
    }

    #[test]
    fn test_fn_handler_answers() {
        let handler = handler_fn(|request| {
            let n = request.data().and_then(Value::as_i64).unwrap_or(0);
            Ok(Some(Value::from(n * 2)))
        });
        let (sink, seen) = capture();

        dispatch_request(&handler, Request::new("com.test.double", 21), sink);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data(), Some(&Value::from(42)));
    }

    #[test]
    fn test_handler_error_becomes_failure() {
        let handler = deferred_fn(|_, _responder| Err(FailureMessage::new("EMOVIE", "no such movie")));
        let (sink, seen) = capture();

        dispatch_request(&handler, Request::new("com.test.movie", 1), sink);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(failure_code(&seen[0]), Some("EMOVIE"));
    }

    #[test]
    fn test_handler_panic_becomes_failure() {
        let handler = handler_fn(|_| panic!("boom"));
        let (sink, seen) = capture();

        dispatch_request(&handler, Request::new("com.test.panic", 1), sink);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let failure = seen[0].failure_message().unwrap();
        assert_eq!(failure.code(), codes::HANDLER);
        assert!(failure.message().contains("boom"));
    }

    #[test]
    fn test_dropped_responder_fails_once() {
        let handler = deferred_fn(|_, responder| {
            drop(responder);
            Ok(())
        });
        let (sink, seen) = capture();

        dispatch_request(&handler, Request::new("com.test.drop", 1), sink);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(failure_code(&seen[0]), Some(codes::HANDLER));
    }

    #[test]
    fn test_error_after_answer_is_ignored() {
        let handler = deferred_fn(|_, responder| {
            responder.respond(Some(Value::from("ok")));
            Err(FailureMessage::handler("too late"))
        });
        let (sink, seen) = capture();

        dispatch_request(&handler, Request::new("com.test.late", 1), sink);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_success());
    }

    #[test]
    fn test_responder_answers_from_another_thread() {
        let handler = deferred_fn(|_, responder| {
            std::thread::spawn(move || responder.respond(Some(Value::from(7))));
            Ok(())
        });
        let (tx, rx) = std::sync::mpsc::channel();
        let sink: ResponseSink = Box::new(move |response| {
            let _ = tx.send(response);
        });

        dispatch_request(&handler, Request::new("com.test.thread", 1), sink);

        let response = rx.recv().unwrap();
        assert_eq!(response.data(), Some(&Value::from(7)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_async_handler() {
        struct Upper;

        #[async_trait]
        impl AsyncRequestHandler for Upper {
            async fn handle(&self, request: Request) -> HandlerResult {
                tokio::task::yield_now().await;
                let text = request.data().and_then(Value::as_str).unwrap_or_default();
                Ok(Some(Value::from(text.to_uppercase())))
            }
        }

        let (tx, rx) = oneshot::channel();
        let sink: ResponseSink = Box::new(move |response| {
            let _ = tx.send(response);
        });

        dispatch_request(&async_handler(Upper), Request::new("com.test.upper", "abc"), sink);

        let response = rx.await.unwrap();
        assert_eq!(response.data(), Some(&Value::from("ABC")));
    }

    #[test]
    fn test_listener_failures_are_contained() {
        struct Failing;

        impl EventListener for Failing {
            fn on_event(&self, _event: &Event) -> Result<(), BoxError> {
                Err("listener refused".into())
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let counting = listener_fn(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let panicking = listener_fn(|_| panic!("listener exploded"));

        let event = Event::new("com.test.tick", None);
        notify_listener(&Failing, &event);
        notify_listener(&panicking, &event);
        notify_listener(&counting, &event);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
