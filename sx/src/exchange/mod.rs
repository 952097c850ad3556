//! Sysex exchange coordinator
//!
//! Owns one [`TimeoutGuard`](crate::guard::TimeoutGuard), sends requests
//! through a [`MidiTransport`](crate::transport::MidiTransport), classifies
//! every inbound frame against a response table and publishes the outcome:
//! - **ResponseReceived:** first matching frame before the deadline
//! - **ResponseTimedOut:** deadline elapsed first

mod config;
mod core;

pub use config::ExchangeConfig;
pub use core::{DEFAULT_RESPONSE_DEADLINE, ExchangeError, ExchangeMetrics, SysexExchange};
