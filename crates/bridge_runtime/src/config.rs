//! Bridge tuning knobs.

use std::time::Duration;

use bridge_types::DEFAULT_REQUEST_TIMEOUT_MS;
use serde::{Deserialize, Serialize};

/// Runtime settings for one transceiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Timeout given to requests built through the transceiver
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Soft limit on messages buffered before the counterpart is ready.
    /// Exceeding it logs a warning; nothing is dropped.
    #[serde(default)]
    pub max_queued_messages: Option<usize>,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_queued_messages: None,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = Some(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_queued_messages, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BridgeConfig = serde_json::from_str(r#"{"max_queued_messages": 64}"#).unwrap();
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.max_queued_messages, Some(64));
    }

    #[test]
    fn test_builders() {
        let config = BridgeConfig::default()
            .with_request_timeout(Duration::from_millis(250))
            .with_max_queued_messages(8);
        assert_eq!(config.request_timeout_ms, 250);
        assert_eq!(config.max_queued_messages, Some(8));
    }
}
