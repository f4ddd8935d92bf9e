//! Constants exposed to the other runtime at startup.

use std::sync::Arc;

use bridge_types::Map;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::BoxError;

/// Contributes a map of constant values
pub trait ConstantsProvider: Send + Sync + 'static {
    fn constants(&self) -> Result<Map, BoxError>;
}

/// Provider returning a fixed map
pub struct StaticConstants(pub Map);

impl ConstantsProvider for StaticConstants {
    fn constants(&self) -> Result<Map, BoxError> {
        Ok(self.0.clone())
    }
}

/// Providers in registration order
#[derive(Default)]
pub struct ConstantsRegistry {
    providers: RwLock<Vec<Arc<dyn ConstantsProvider>>>,
}

impl ConstantsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, provider: Arc<dyn ConstantsProvider>) {
        self.providers.write().push(provider);
    }

    /// Merge every provider's map. Later providers win on key collisions;
    /// a failing provider is skipped.
    pub fn aggregate(&self) -> Map {
        let providers = self.providers.read().clone();
        let mut merged = Map::new();
        for (index, provider) in providers.iter().enumerate() {
            match provider.constants() {
                Ok(map) => merged.extend(map),
                Err(e) => warn!(provider = index, error = %e, "Constants provider failed, skipping"),
            }
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.providers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use bridge_types::Value;

    use super::*;

    struct Broken;

    impl ConstantsProvider for Broken {
        fn constants(&self) -> Result<Map, BoxError> {
            Err("settings unavailable".into())
        }
    }

    fn fixed(pairs: &[(&str, i64)]) -> Arc<dyn ConstantsProvider> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect();
        Arc::new(StaticConstants(map))
    }

    #[test]
    fn test_last_registered_wins() {
        let registry = ConstantsRegistry::new();
        registry.add(fixed(&[("version", 1), ("width", 320)]));
        registry.add(fixed(&[("version", 2)]));

        let merged = registry.aggregate();
        assert_eq!(merged.get("version"), Some(&Value::from(2)));
        assert_eq!(merged.get("width"), Some(&Value::from(320)));
    }

    #[test]
    fn test_failing_provider_is_skipped() {
        let registry = ConstantsRegistry::new();
        registry.add(fixed(&[("a", 1)]));
        registry.add(Arc::new(Broken));
        registry.add(fixed(&[("b", 2)]));

        let merged = registry.aggregate();
        assert_eq!(merged.len(), 2);
        assert_eq!(registry.len(), 3);

        registry.reset();
        assert!(registry.aggregate().is_empty());
    }
}
