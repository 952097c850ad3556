//! MIDI transport seam
//!
//! The exchange only needs three things from a transport: a fire-and-forget
//! send, and registration/removal of a listener that sees every inbound
//! frame. The transport is shared, so listeners receive unrelated traffic
//! too and must filter it themselves.

mod loopback;
mod simulated;

use std::sync::Arc;

use thiserror::Error;

pub use loopback::LoopbackTransport;
pub use simulated::{SimulatedDevice, SimulatorConfig};

/// Errors reported by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Listener registration failed: {0}")]
    ListenerRegistration(String),
}

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Callback invoked for every inbound frame, on whatever thread the transport delivers from
pub type FrameListener = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Message-oriented MIDI byte transport
pub trait MidiTransport: Send + Sync {
    /// Send one frame without waiting for any reply
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to all inbound frames
    fn register_listener(&self, listener: FrameListener) -> Result<ListenerId, TransportError>;

    /// Remove a listener; unknown ids are ignored
    fn unregister_listener(&self, id: ListenerId);
}
