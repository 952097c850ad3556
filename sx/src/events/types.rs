//! Event types published when an exchange resolves

use serde::{Deserialize, Serialize};

/// Terminal outcome of one request/response cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExchangeEvent {
    /// An inbound frame matched the response table before the deadline
    ResponseReceived,
    /// The deadline elapsed with no matching frame
    ResponseTimedOut,
}

impl ExchangeEvent {
    /// Get the event type name (for logging and filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            ExchangeEvent::ResponseReceived => "ResponseReceived",
            ExchangeEvent::ResponseTimedOut => "ResponseTimedOut",
        }
    }

    /// Whether the exchange ended with a reply
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeEvent::ResponseReceived)
    }
}
