//! Handler and listener registries.

mod event;
mod request;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use event::EventRegistry;
pub use request::RequestRegistry;

/// Identifies one registration so it can be removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
