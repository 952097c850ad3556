//! In-memory transport
//!
//! Sent frames are recorded; inbound frames are injected with
//! [`LoopbackTransport::deliver`] and fanned out to every listener on the
//! caller's thread.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::debug;

use super::{FrameListener, ListenerId, MidiTransport, TransportError};

#[derive(Default)]
pub struct LoopbackTransport {
    listeners: Mutex<Vec<(ListenerId, FrameListener)>>,
    sent: Mutex<Vec<Vec<u8>>>,
    next_id: AtomicU64,
    fail_sends: AtomicBool,
    fail_registrations: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound frame to every registered listener
    pub fn deliver(&self, frame: &[u8]) {
        debug!(len = frame.len(), "LoopbackTransport::deliver: called");
        // Snapshot so listeners may (un)register from inside the callback
        let listeners: Vec<FrameListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(frame);
        }
    }

    /// Make subsequent sends fail (or succeed again)
    pub fn set_fail_sends(&self, fail: bool) {
        debug!(fail, "LoopbackTransport::set_fail_sends: called");
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent listener registrations fail (or succeed again)
    pub fn set_fail_registrations(&self, fail: bool) {
        debug!(fail, "LoopbackTransport::set_fail_registrations: called");
        self.fail_registrations.store(fail, Ordering::SeqCst);
    }

    /// Frames sent so far, oldest first
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

impl MidiTransport for LoopbackTransport {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        debug!(len = frame.len(), "LoopbackTransport::send_frame: called");
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("loopback configured to fail".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(frame.to_vec());
        Ok(())
    }

    fn register_listener(&self, listener: FrameListener) -> Result<ListenerId, TransportError> {
        if self.fail_registrations.load(Ordering::SeqCst) {
            return Err(TransportError::ListenerRegistration(
                "loopback configured to refuse listeners".to_string(),
            ));
        }
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(id = id.get(), "LoopbackTransport::register_listener: called");
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        Ok(id)
    }

    fn unregister_listener(&self, id: ListenerId) {
        debug!(id = id.get(), "LoopbackTransport::unregister_listener: called");
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(registered, _)| *registered != id);
    }
}
