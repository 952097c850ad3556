//! sysexchange - timeout-guarded MIDI sysex request/response exchange
//!
//! A request is sent over a shared, unreliable MIDI transport and the
//! exchange then waits for a reply whose header matches a known table. The
//! wait resolves exactly once: by the first matching frame, or by the
//! deadline, whichever comes first.
//!
//! # Modules
//!
//! - [`guard`] - single-shot success-or-timeout primitive
//! - [`matcher`] - header prefix matching and the response table
//! - [`exchange`] - the coordinator wiring transport, guard and table together
//! - [`events`] - `ResponseReceived` / `ResponseTimedOut` publication
//! - [`transport`] - transport trait, loopback and simulated device
//! - [`k5000`] - Kawai K5000 headers and dump requests
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod events;
pub mod exchange;
pub mod guard;
pub mod k5000;
pub mod matcher;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use events::{EventBus, EventSink, ExchangeEvent};
pub use exchange::{DEFAULT_RESPONSE_DEADLINE, ExchangeConfig, ExchangeError, ExchangeMetrics, SysexExchange};
pub use guard::{GuardError, GuardState, TimeoutGuard};
pub use matcher::{HeaderPattern, ResponseTable};
pub use transport::{LoopbackTransport, MidiTransport, TransportError};
