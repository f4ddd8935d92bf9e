//! Event listener registry: any number of listeners per event name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::SubscriptionId;
use crate::error::{BridgeError, BridgeResult};
use crate::handler::EventListener;

struct Entry {
    id: SubscriptionId,
    listener: Arc<dyn EventListener>,
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Vec<Entry>>,
    names: HashMap<SubscriptionId, String>,
}

#[derive(Default)]
pub struct EventRegistry {
    inner: RwLock<Inner>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` for `name`. Fails if `id` is already in use.
    pub fn register(
        &self,
        name: &str,
        id: SubscriptionId,
        listener: Arc<dyn EventListener>,
    ) -> BridgeResult<()> {
        let mut inner = self.inner.write();
        if inner.names.contains_key(&id) {
            warn!(name, %id, "Subscription id already in use, rejecting");
            return Err(BridgeError::DuplicateSubscription { id });
        }
        inner
            .by_name
            .entry(name.to_string())
            .or_default()
            .push(Entry { id, listener });
        inner.names.insert(id, name.to_string());
        debug!(name, %id, "Registered event listener");
        Ok(())
    }

    pub fn unregister(&self, id: SubscriptionId) -> Option<Arc<dyn EventListener>> {
        let mut inner = self.inner.write();
        let name = inner.names.remove(&id)?;
        let entries = inner.by_name.get_mut(&name)?;
        let index = entries.iter().position(|entry| entry.id == id)?;
        let entry = entries.remove(index);
        if entries.is_empty() {
            inner.by_name.remove(&name);
        }
        debug!(name = %name, %id, "Unregistered event listener");
        Some(entry.listener)
    }

    /// Snapshot of the listeners for `name`, in registration order
    ///
    /// Callers invoke the snapshot without holding the registry lock.
    pub fn listeners_for(&self, name: &str) -> Vec<Arc<dyn EventListener>> {
        self.inner
            .read()
            .by_name
            .get(name)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| Arc::clone(&entry.listener))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn listener_ids(&self, name: &str) -> Vec<SubscriptionId> {
        self.inner
            .read()
            .by_name
            .get(name)
            .map(|entries| entries.iter().map(|entry| entry.id).collect())
            .unwrap_or_default()
    }

    /// Total number of registered listeners
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.by_name.clear();
        inner.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::listener_fn;

    fn noop() -> Arc<dyn EventListener> {
        Arc::new(listener_fn(|_| {}))
    }

    #[test]
    fn test_many_listeners_per_name() {
        let registry = EventRegistry::new();
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        registry.register("com.test.tick", a, noop()).unwrap();
        registry.register("com.test.tick", b, noop()).unwrap();
        registry
            .register("com.test.other", SubscriptionId::new(), noop())
            .unwrap();

        assert_eq!(registry.listeners_for("com.test.tick").len(), 2);
        assert_eq!(registry.listener_ids("com.test.tick"), vec![a, b]);
        assert_eq!(registry.len(), 3);
        assert!(registry.listeners_for("com.test.none").is_empty());
    }

    #[test]
    fn test_unregister_one_listener() {
        let registry = EventRegistry::new();
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        registry.register("com.test.tick", a, noop()).unwrap();
        registry.register("com.test.tick", b, noop()).unwrap();

        assert!(registry.unregister(a).is_some());
        assert!(registry.unregister(a).is_none());
        assert_eq!(registry.listener_ids("com.test.tick"), vec![b]);

        assert!(registry.unregister(b).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reused_id_is_rejected() {
        let registry = EventRegistry::new();
        let id = SubscriptionId::new();
        registry.register("com.test.tick", id, noop()).unwrap();

        let err = registry.register("com.test.other", id, noop()).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateSubscription { id });
        assert!(registry.listeners_for("com.test.other").is_empty());

        assert!(registry.unregister(id).is_some());
        assert!(registry.is_empty());
    }
}
