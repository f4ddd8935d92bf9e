//! Typed requests, handlers and listeners on top of [`Payload`] conversion.
//!
//! Conversion failures surface as `EINVALIDDATA` failures rather than panics.

use std::marker::PhantomData;

use bridge_types::{Event, FailureMessage, MessageError, Payload, Request, RequestBuilder, Value};
use tracing::warn;

use crate::error::BoxError;
use crate::handler::{EventListener, RequestHandler, Responder};
use crate::holder::BridgeHolder;
use crate::transaction::PendingResponse;
use crate::transceiver::Transceiver;

/// Something requests and events can be sent through
pub trait MessageSender {
    /// Request builder carrying the sender's configured timeout
    fn request(&self, name: &str) -> RequestBuilder;
    fn send_request(&self, request: Request) -> PendingResponse;
    fn send_event(&self, event: Event);
}

impl MessageSender for Transceiver {
    fn request(&self, name: &str) -> RequestBuilder {
        Transceiver::request(self, name)
    }

    fn send_request(&self, request: Request) -> PendingResponse {
        Transceiver::send_request(self, request)
    }

    fn send_event(&self, event: Event) {
        Transceiver::send_event(self, event)
    }
}

impl MessageSender for BridgeHolder {
    fn request(&self, name: &str) -> RequestBuilder {
        BridgeHolder::request(self, name)
    }

    fn send_request(&self, request: Request) -> PendingResponse {
        BridgeHolder::send_request(self, request)
    }

    fn send_event(&self, event: Event) {
        BridgeHolder::send_event(self, event)
    }
}

fn invalid(e: MessageError) -> FailureMessage {
    FailureMessage::invalid_data(e.to_string())
}

/// Send `payload` as request `name` and decode the response as `Resp`
pub async fn send_typed<S, Req, Resp>(
    sender: &S,
    name: &str,
    payload: &Req,
) -> Result<Resp, FailureMessage>
where
    S: MessageSender + ?Sized,
    Req: Payload,
    Resp: Payload,
{
    let data = payload.to_value().map_err(invalid)?;
    let response = sender.send_request(sender.request(name).data(data).build()).await;
    let data = response.into_result()?;
    Resp::from_value(data.unwrap_or_default()).map_err(invalid)
}

/// Broadcast `payload` as event `name`
pub fn emit_typed<S, T>(sender: &S, name: &str, payload: &T) -> Result<(), MessageError>
where
    S: MessageSender + ?Sized,
    T: Payload,
{
    let data = payload.to_value()?;
    sender.send_event(Event::new(name, Some(data)));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Handler decoding `Req` and encoding `Resp`
pub struct TypedHandler<Req, Resp, F> {
    func: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> RequestHandler for TypedHandler<Req, Resp, F>
where
    Req: Payload + 'static,
    Resp: Payload + 'static,
    F: Fn(Req) -> Result<Resp, FailureMessage> + Send + Sync + 'static,
{
    fn on_request(&self, request: Request, responder: Responder) -> Result<(), FailureMessage> {
        let input = Req::from_value(request.data().cloned().unwrap_or_default()).map_err(invalid)?;
        let output = (self.func)(input)?;
        let data = output.to_value().map_err(invalid)?;
        responder.respond(match data {
            Value::Null => None,
            data => Some(data),
        });
        Ok(())
    }
}

pub fn handle_typed<Req, Resp, F>(func: F) -> TypedHandler<Req, Resp, F>
where
    Req: Payload + 'static,
    Resp: Payload + 'static,
    F: Fn(Req) -> Result<Resp, FailureMessage> + Send + Sync + 'static,
{
    TypedHandler {
        func,
        _types: PhantomData,
    }
}

/// Listener decoding its event payload as `T`
pub struct TypedListener<T, F> {
    func: F,
    _types: PhantomData<fn(T)>,
}

impl<T, F> EventListener for TypedListener<T, F>
where
    T: Payload + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event) -> Result<(), BoxError> {
        let payload = T::from_value(event.data().cloned().unwrap_or_default()).map_err(|e| {
            warn!(name = %event.name(), error = %e, "Event payload did not decode");
            e
        })?;
        (self.func)(payload);
        Ok(())
    }
}

pub fn listen_typed<T, F>(func: F) -> TypedListener<T, F>
where
    T: Payload + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    TypedListener {
        func,
        _types: PhantomData,
    }
}
