//! Outstanding request tracking.
//!
//! Every locally originated request opens a transaction keyed by its id. The
//! transaction ends exactly once: with the first response to arrive, with a
//! synthesized timeout failure, or with a reset failure. Anything arriving
//! after that finds no entry and is dropped.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use bridge_types::{FailureMessage, Request, Response, codes};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::error::{BridgeError, BridgeResult};

/// Transactions are keyed by the id of the request that opened them
pub type TransactionId = String;

/// Callback form of a transaction completion
pub type ResponseCallback = Box<dyn FnOnce(Response) + Send>;

/// How a finished transaction hands its response back
pub enum Completion {
    /// Resolves a [`PendingResponse`]
    Channel(oneshot::Sender<Response>),
    /// Runs on whichever thread completes the transaction
    Callback(ResponseCallback),
}

impl Completion {
    /// Channel completion paired with the future that awaits it
    pub fn channel(request: &Request) -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let pending = PendingResponse {
            id: request.id().to_string(),
            name: request.name().to_string(),
            rx,
        };
        (Completion::Channel(tx), pending)
    }

    pub fn callback(callback: impl FnOnce(Response) + Send + 'static) -> Self {
        Completion::Callback(Box::new(callback))
    }

    fn deliver(self, response: Response) {
        match self {
            Completion::Channel(tx) => {
                if tx.send(response).is_err() {
                    debug!("Response receiver dropped before completion");
                }
            }
            Completion::Callback(callback) => {
                let id = response.id().to_string();
                if panic::catch_unwind(AssertUnwindSafe(|| callback(response))).is_err() {
                    error!(%id, "Response callback panicked");
                }
            }
        }
    }
}

struct Transaction {
    request: Request,
    // Locked only so the table stays `Sync`; taken by value on completion
    completion: Mutex<Completion>,
    timer: Option<AbortHandle>,
}

impl Transaction {
    fn finish(self, response: Response) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.completion.into_inner().deliver(response);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timer Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime for timers of transactions opened outside any tokio runtime
static TIMER_RUNTIME: OnceLock<Option<Handle>> = OnceLock::new();

fn timer_runtime() -> Option<Handle> {
    TIMER_RUNTIME.get_or_init(spawn_timer_thread).clone()
}

fn spawn_timer_thread() -> Option<Handle> {
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<Handle>(1);

    let spawned = thread::Builder::new()
        .name("bridge-timers".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "Failed to build the bridge timer runtime");
                    return;
                }
            };
            if init_tx.send(rt.handle().clone()).is_err() {
                return;
            }
            // Drives spawned timers for the life of the process
            rt.block_on(std::future::pending::<()>());
        });

    if let Err(e) = spawned {
        error!(error = %e, "Failed to spawn the bridge timer thread");
        return None;
    }
    init_rx.recv().ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction Tracker
// ─────────────────────────────────────────────────────────────────────────────

/// Table of in-flight requests
pub struct TransactionTracker {
    pending: DashMap<TransactionId, Transaction>,
    runtime: Option<Handle>,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
            runtime: Handle::try_current().ok(),
        }
    }
}

impl TransactionTracker {
    /// Create a tracker
    ///
    /// Timers run on the tokio runtime current when a transaction opens, else
    /// the one current at creation. Without either they run on a shared
    /// background timer thread, so every timeout fires.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start tracking `request`
    ///
    /// A request with a timeout gets a timer task that fails the transaction
    /// with `EREQUESTTIMEOUT` unless a response arrives first.
    pub fn open(self: &Arc<Self>, request: Request, completion: Completion) -> BridgeResult<TransactionId> {
        let id = request.id().to_string();
        let timeout = request.timeout();

        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(BridgeError::DuplicateTransaction { id });
            }
            Entry::Vacant(slot) => {
                slot.insert(Transaction {
                    request,
                    completion: Mutex::new(completion),
                    timer: None,
                });
            }
        }

        if let Some(timeout) = timeout {
            self.start_timer(&id, timeout);
        }
        debug!(%id, pending = self.pending.len(), "Opened transaction");
        Ok(id)
    }

    fn start_timer(self: &Arc<Self>, id: &str, timeout: Duration) {
        let Some(runtime) = Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
            .or_else(timer_runtime)
        else {
            error!(%id, "No timer runtime available, request will not time out");
            return;
        };

        let tracker = Arc::downgrade(self);
        let timer_id = id.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.timeout_expired(&timer_id);
            }
        });

        match self.pending.get_mut(id) {
            Some(mut transaction) => transaction.timer = Some(task.abort_handle()),
            // Completed before the timer was attached
            None => task.abort(),
        }
    }

    /// Finish the transaction `id` with `response`
    pub fn complete(&self, id: &str, response: Response) -> BridgeResult<()> {
        let Some((_, transaction)) = self.pending.remove(id) else {
            return Err(BridgeError::UnknownTransaction { id: id.to_string() });
        };
        debug!(%id, success = response.is_success(), "Completed transaction");
        transaction.finish(response);
        Ok(())
    }

    /// Fail the transaction `id` with a timeout, if it is still pending
    pub fn timeout_expired(&self, id: &str) {
        match self.pending.remove(id) {
            Some((_, transaction)) => {
                warn!(%id, name = %transaction.request.name(), "Request timed out");
                let response = Response::failure(&transaction.request, FailureMessage::timeout());
                transaction.finish(response);
            }
            None => debug!(%id, "Timer fired for a finished transaction"),
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fail every pending transaction with `EBRIDGERESET`
    pub fn reset(&self) {
        let ids: Vec<TransactionId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, transaction)) = self.pending.remove(&id) {
                let response = Response::failure(&transaction.request, reset_failure());
                transaction.finish(response);
            }
        }
    }
}

fn reset_failure() -> FailureMessage {
    FailureMessage::new(codes::RESET, "Bridge was reset before the request completed")
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending Response
// ─────────────────────────────────────────────────────────────────────────────

/// Future resolving to the response of one request
///
/// Always resolves: if the bridge discards the transaction without answering,
/// the result is an `EBRIDGERESET` failure.
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    id: String,
    name: String,
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    pub fn request_id(&self) -> &str {
        &self.id
    }

    pub fn request_name(&self) -> &str {
        &self.name
    }
}

impl Future for PendingResponse {
    type Output = Response;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(response)) => Poll::Ready(response),
            Poll::Ready(Err(_)) => Poll::Ready(Response::new(
                this.id.clone(),
                this.name.clone(),
                None,
                Some(reset_failure()),
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bridge_types::Value;

    use super::*;

    fn request(timeout_ms: Option<u64>) -> Request {
        let builder = Request::builder("com.test.tx").data(1);
        match timeout_ms {
            Some(ms) => builder.timeout(Duration::from_millis(ms)).build(),
            None => builder.no_timeout().build(),
        }
    }

    #[tokio::test]
    async fn test_complete_resolves_pending() {
        let tracker = TransactionTracker::new_shared();
        let request = request(Some(1_000));
        let (completion, pending) = Completion::channel(&request);

        let id = tracker.open(request.clone(), completion).unwrap();
        assert!(tracker.is_pending(&id));

        tracker
            .complete(&id, Response::success(&request, Some(Value::from(5))))
            .unwrap();
        assert!(tracker.is_empty());

        let response = pending.await;
        assert_eq!(response.data(), Some(&Value::from(5)));
    }

    #[tokio::test]
    async fn test_completion_fires_at_most_once() {
        let tracker = TransactionTracker::new_shared();
        let request = request(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        let id = tracker
            .open(
                request.clone(),
                Completion::callback(move |_| {
                    counted.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tracker.complete(&id, Response::success(&request, None)).unwrap();
        let second = tracker.complete(&id, Response::success(&request, None));

        assert_eq!(second, Err(BridgeError::UnknownTransaction { id }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_open_is_rejected() {
        let tracker = TransactionTracker::new_shared();
        let request = request(None);

        tracker
            .open(request.clone(), Completion::callback(|_| {}))
            .unwrap();
        let err = tracker
            .open(request.clone(), Completion::callback(|_| {}))
            .unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateTransaction { .. }));
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_synthesizes_failure() {
        let tracker = TransactionTracker::new_shared();
        let request = request(Some(50));
        let (completion, pending) = Completion::channel(&request);
        let id = tracker.open(request.clone(), completion).unwrap();

        let response = pending.await;
        assert!(response.failure_message().unwrap().is_timeout());
        assert_eq!(response.id(), id);

        // Late response is dropped
        assert!(tracker.complete(&id, Response::success(&request, None)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_cancels_timer() {
        let tracker = TransactionTracker::new_shared();
        let request = request(Some(50));
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        let id = tracker
            .open(
                request.clone(),
                Completion::callback(move |response| {
                    assert!(response.is_success());
                    counted.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        tracker.complete(&id, Response::success(&request, None)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_fails_pending_transactions() {
        let tracker = TransactionTracker::new_shared();
        let request = request(Some(10_000));
        let (completion, pending) = Completion::channel(&request);
        tracker.open(request, completion).unwrap();

        tracker.reset();
        assert!(tracker.is_empty());

        let response = pending.await;
        assert_eq!(response.failure_message().unwrap().code(), codes::RESET);
    }

    #[test]
    fn test_timeout_fires_without_tokio_runtime() {
        let tracker = TransactionTracker::new_shared();
        let request = request(Some(20));
        let (completion, pending) = Completion::channel(&request);
        let id = tracker.open(request, completion).unwrap();

        let response = tokio_test::block_on(pending);
        assert!(response.failure_message().unwrap().is_timeout());
        assert_eq!(response.id(), id);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tracker_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TransactionTracker>();

        let tracker = TransactionTracker::new_shared();
        let request = request(None);
        let (completion, pending) = Completion::channel(&request);
        let id = tracker.open(request.clone(), completion).unwrap();

        let remote = Arc::clone(&tracker);
        std::thread::spawn(move || {
            remote
                .complete(&id, Response::success(&request, Some(Value::from(9))))
                .unwrap();
        })
        .join()
        .unwrap();

        let response = tokio_test::block_on(pending);
        assert_eq!(response.data(), Some(&Value::from(9)));
    }
}
