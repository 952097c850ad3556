//! Exchange configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::core::DEFAULT_RESPONSE_DEADLINE;

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// How long to wait for a reply, in milliseconds
    #[serde(rename = "response-timeout-ms", default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Sysex channel of the target device (0-15)
    #[serde(default)]
    pub channel: u8,
}

fn default_response_timeout_ms() -> u64 {
    debug!("default_response_timeout_ms: called");
    DEFAULT_RESPONSE_DEADLINE.as_millis() as u64
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        debug!("ExchangeConfig::default: called");
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            channel: 0,
        }
    }
}

impl ExchangeConfig {
    /// Get the response timeout as a Duration
    pub fn response_timeout(&self) -> Duration {
        debug!(response_timeout_ms = %self.response_timeout_ms, "ExchangeConfig::response_timeout: called");
        Duration::from_millis(self.response_timeout_ms)
    }
}
