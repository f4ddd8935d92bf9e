//! Demo Session
//!
//! Wires a native and a script transceiver over the in-process link and runs
//! a short exchange. The script side is played by handlers registered on the
//! `Js` transceiver; application code on the native side only ever talks to
//! the [`BridgeHolder`], including before the bridge exists.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bridge_link::{LinkError, connect};
use bridge_runtime::{
    BridgeError, BridgeHolder, StaticConstants, Transceiver, handle_typed, handler_fn, listener_fn, send_typed,
};
use bridge_types::{Event, FailureMessage, Map, Runtime, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HostConfig;

pub const CALC_ADD: &str = "com.example.calc.add";
pub const MOVIES_LIST: &str = "com.example.movies.list";
pub const SETTINGS_GET: &str = "com.example.settings.get";
pub const TICK: &str = "com.example.tick";

/// Error type for a demo session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Link failed: {0}")]
    Link(#[from] LinkError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Request failed: {0}")]
    Request(#[from] FailureMessage),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddInput {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
}

/// What the session observed
#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub sum: i64,
    pub movies: Vec<Movie>,
    /// Settings the script side fetched from the native side
    pub settings: Value,
    /// Ticks queued before the handshake that reached the script side
    pub ticks_seen_by_script: usize,
    /// Code of the failure for a request nobody handles
    pub unhandled_code: Option<String>,
    pub constants: Map,
}

/// Register the native application's handlers through the holder
fn register_native(holder: &BridgeHolder, config: &HostConfig) -> Result<(), SessionError> {
    let timeout_ms = i64::try_from(config.bridge.request_timeout_ms).unwrap_or(i64::MAX);
    holder
        .register_request_handler(
            SETTINGS_GET,
            handler_fn(move |_| {
                Ok(Some(Value::object_from_pairs([
                    ("requestTimeoutMs", Value::from(timeout_ms)),
                    ("platform", Value::from(std::env::consts::OS)),
                ])))
            }),
        )?;

    let constants: Map = [
        ("runtime".to_string(), Value::from("native")),
        ("version".to_string(), Value::from(env!("CARGO_PKG_VERSION"))),
    ]
    .into_iter()
    .collect();
    holder.add_constants_provider(StaticConstants(constants));
    Ok(())
}

/// Register the handlers the script application would provide
fn register_script(script: &Transceiver, config: &HostConfig) -> Arc<AtomicUsize> {
    let movies: Vec<Movie> = config
        .demo
        .movies
        .iter()
        .zip(1..)
        .map(|(title, id)| Movie {
            id,
            title: title.clone(),
        })
        .collect();

    // Fresh transceiver: names cannot collide
    let _ = script.register_request_handler(CALC_ADD, handle_typed(|input: AddInput| Ok(input.a + input.b)));
    let _ = script.register_request_handler(MOVIES_LIST, handle_typed(move |(): ()| Ok(movies.clone())));

    let ticks = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&ticks);
    script.register_event_listener(
        TICK,
        listener_fn(move |event| {
            debug!("Script saw tick {:?}", event.data());
            counted.fetch_add(1, Ordering::SeqCst);
        }),
    );
    ticks
}

/// Run the demo exchange end to end
pub async fn run(config: &HostConfig) -> Result<DemoReport, SessionError> {
    // Application code starts talking before any bridge exists
    let holder = BridgeHolder::with_config(config.bridge.clone());
    register_native(&holder, config)?;
    for n in 0..config.demo.ticks {
        holder.send_event(Event::with_data(TICK, i64::from(n)));
    }
    info!("Queued {} calls before the bridge exists", holder.queued_calls());

    let native = Transceiver::with_config(Runtime::Native, config.bridge.clone());
    let script = Transceiver::with_config(Runtime::Js, config.bridge.clone());
    let ticks = register_script(&script, config);

    let link = connect(&native, &script)?;
    holder.set_bridge(native.clone());
    info!("Native side buffered {} messages", native.queued_len());

    link.handshake()?;
    native.wait_ready().await;
    script.wait_ready().await;
    info!("Handshake complete");

    let (a, b) = config.demo.operands;
    let sum: i64 = send_typed(&holder, CALC_ADD, &AddInput { a, b }).await?;
    info!("{} + {} = {}", a, b, sum);

    let movies: Vec<Movie> = send_typed(&holder, MOVIES_LIST, &()).await?;
    info!("Script side serves {} movies", movies.len());

    let settings: Value = send_typed(&script, SETTINGS_GET, &()).await?;
    info!("Script side fetched settings: {:?}", settings);

    let unhandled = holder
        .send_request(holder.request("com.example.unknown").build())
        .await;
    let unhandled_code = unhandled
        .failure_message()
        .map(|failure| failure.code().to_string());

    let constants = native.constants();
    link.shutdown().await;

    Ok(DemoReport {
        sum,
        movies,
        settings,
        ticks_seen_by_script: ticks.load(Ordering::SeqCst),
        unhandled_code,
        constants,
    })
}
