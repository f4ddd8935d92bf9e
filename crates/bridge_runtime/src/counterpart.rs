//! The other runtime, as seen from one transceiver.

use std::sync::Arc;

use bridge_types::WireMap;
use parking_lot::Mutex;

use crate::error::CounterpartError;

/// Outbound side of the bridge
///
/// `deliver` is called with the transceiver's outbound lock held and must not
/// call back into the transceiver synchronously. Implementations hand the map
/// to a channel or queue and return.
pub trait Counterpart: Send + Sync + 'static {
    fn deliver(&self, message: WireMap) -> Result<(), CounterpartError>;
}

/// Counterpart that records every delivered map
///
/// Useful for tests and for hosts that poll outbound traffic themselves.
#[derive(Default)]
pub struct RecordingCounterpart {
    delivered: Mutex<Vec<WireMap>>,
}

impl RecordingCounterpart {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remove and return everything delivered so far
    pub fn take(&self) -> Vec<WireMap> {
        std::mem::take(&mut *self.delivered.lock())
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Counterpart for RecordingCounterpart {
    fn deliver(&self, message: WireMap) -> Result<(), CounterpartError> {
        self.delivered.lock().push(message);
        Ok(())
    }
}
