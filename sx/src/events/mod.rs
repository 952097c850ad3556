//! Exchange events and the bus that broadcasts them
//!
//! The outcome of an exchange is never returned to the caller of
//! `request()`. It is published as one of two events:
//!
//! - [`ExchangeEvent::ResponseReceived`] - a matching reply arrived in time
//! - [`ExchangeEvent::ResponseTimedOut`] - the deadline elapsed first
//!
//! The exchange publishes through an injected [`EventSink`]. [`EventBus`] is
//! the sink the binary uses: a tokio broadcast channel any number of
//! subscribers can listen on.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sysexchange::events::{EventBus, ExchangeEvent};
//!
//! let bus = Arc::new(EventBus::with_default_capacity());
//! let mut rx = bus.subscribe();
//!
//! // hand `bus.clone()` to SysexExchange::new(...) as the sink
//!
//! match rx.recv().await? {
//!     ExchangeEvent::ResponseReceived => println!("got it"),
//!     ExchangeEvent::ResponseTimedOut => println!("device silent"),
//! }
//! ```

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventSink, create_event_bus};
pub use types::ExchangeEvent;
