//! Request handler registry: at most one handler per request name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::SubscriptionId;
use crate::error::{BridgeError, BridgeResult};
use crate::handler::RequestHandler;

struct Entry {
    id: SubscriptionId,
    handler: Arc<dyn RequestHandler>,
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Entry>,
    names: HashMap<SubscriptionId, String>,
}

/// Maps request names to their single handler
#[derive(Default)]
pub struct RequestRegistry {
    inner: Mutex<Inner>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`
    ///
    /// Fails if a handler is already active for the name or `id` is already
    /// in use. The checks and the insert happen under one lock.
    pub fn register(
        &self,
        name: &str,
        id: SubscriptionId,
        handler: Arc<dyn RequestHandler>,
    ) -> BridgeResult<()> {
        let mut inner = self.inner.lock();
        if inner.names.contains_key(&id) {
            warn!(name, %id, "Subscription id already in use, rejecting");
            return Err(BridgeError::DuplicateSubscription { id });
        }
        if inner.by_name.contains_key(name) {
            warn!(name, "Request handler already registered, rejecting");
            return Err(BridgeError::DuplicateHandler {
                name: name.to_string(),
            });
        }

        inner.by_name.insert(name.to_string(), Entry { id, handler });
        inner.names.insert(id, name.to_string());
        debug!(name, %id, "Registered request handler");
        Ok(())
    }

    /// Remove the handler registered under `id`. Unknown ids return `None`.
    pub fn unregister(&self, id: SubscriptionId) -> Option<Arc<dyn RequestHandler>> {
        let mut inner = self.inner.lock();
        let name = inner.names.remove(&id)?;
        let entry = inner.by_name.remove(&name)?;
        debug!(name = %name, %id, "Unregistered request handler");
        Some(entry.handler)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn RequestHandler>> {
        self.inner
            .lock()
            .by_name
            .get(name)
            .map(|entry| Arc::clone(&entry.handler))
    }

    /// Subscription id of the handler registered for `name`
    pub fn handler_id(&self, name: &str) -> Option<SubscriptionId> {
        self.inner.lock().by_name.get(name).map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.by_name.clear();
        inner.names.clear();
    }
}
