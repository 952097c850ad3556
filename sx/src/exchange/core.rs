//! Main SysexExchange implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::ExchangeConfig;
use crate::events::{EventSink, ExchangeEvent};
use crate::guard::{GuardError, GuardState, TimeoutGuard};
use crate::k5000::{self, Channel, ProfileError};
use crate::matcher::{ResponseTable, is_sysex};
use crate::transport::{FrameListener, ListenerId, MidiTransport, TransportError};

/// Just longer than the largest K5000 block dump takes to arrive
pub const DEFAULT_RESPONSE_DEADLINE: Duration = Duration::from_secs(44);

/// Errors returned synchronously by the exchange
///
/// Timeouts are not errors; they are published as [`ExchangeEvent::ResponseTimedOut`].
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Exchange rejected: {0}")]
    Guard(#[from] GuardError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid device profile: {0}")]
    Profile(#[from] ProfileError),
}

impl ExchangeError {
    /// Whether a request was refused because another one is still in flight
    pub fn is_reentrant(&self) -> bool {
        matches!(self, ExchangeError::Guard(GuardError::AlreadyArmed { .. }))
    }
}

/// Exchange metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExchangeMetrics {
    pub requests_sent: u64,
    pub requests_rejected: u64,
    pub send_failures: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    /// Frames that were not sysex at all
    pub frames_ignored: u64,
    /// Sysex frames matching no header
    pub frames_unmatched: u64,
    /// Matching frames arriving while nothing was armed
    pub frames_late: u64,
}

#[derive(Default)]
struct Counters {
    requests_sent: AtomicU64,
    requests_rejected: AtomicU64,
    send_failures: AtomicU64,
    responses_received: AtomicU64,
    timeouts: AtomicU64,
    frames_ignored: AtomicU64,
    frames_unmatched: AtomicU64,
    frames_late: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExchangeMetrics {
        ExchangeMetrics {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            frames_unmatched: self.frames_unmatched.load(Ordering::Relaxed),
            frames_late: self.frames_late.load(Ordering::Relaxed),
        }
    }
}

/// State reachable from the transport listener
struct Shared {
    guard: TimeoutGuard,
    table: ResponseTable,
    counters: Arc<Counters>,
}

impl Shared {
    fn on_inbound_frame(&self, frame: &[u8]) {
        if !is_sysex(frame) {
            Counters::bump(&self.counters.frames_ignored);
            return;
        }

        let Some(pattern) = self.table.classify(frame) else {
            debug!(len = frame.len(), "SysexExchange: sysex frame matched no header");
            Counters::bump(&self.counters.frames_unmatched);
            return;
        };

        if self.guard.succeed() {
            info!(header = pattern.label(), len = frame.len(), "SysexExchange: response received");
        } else {
            debug!(header = pattern.label(), "SysexExchange: matching frame with nothing armed, ignoring");
            Counters::bump(&self.counters.frames_late);
        }
    }
}

/// Coordinates one outstanding sysex request/response exchange at a time
///
/// The exchange registers its frame listener on construction and removes it
/// on drop. Dropping it while a request is in flight publishes
/// `ResponseTimedOut` for that request. Must be created inside a tokio
/// runtime, which drives the deadline timer.
pub struct SysexExchange {
    shared: Arc<Shared>,
    transport: Arc<dyn MidiTransport>,
    sink: Arc<dyn EventSink>,
    listener_id: ListenerId,
    deadline: Duration,
}

impl SysexExchange {
    /// Create an exchange matching replies against `table`
    pub fn new(
        transport: Arc<dyn MidiTransport>,
        table: ResponseTable,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ExchangeError> {
        debug!(headers = table.len(), "SysexExchange::new: called");
        let shared = Arc::new(Shared {
            guard: TimeoutGuard::new()?,
            table,
            counters: Arc::new(Counters::default()),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let listener: FrameListener = Arc::new(move |frame: &[u8]| {
            if let Some(shared) = weak.upgrade() {
                shared.on_inbound_frame(frame);
            }
        });
        let listener_id = transport.register_listener(listener)?;

        info!(listener_id = listener_id.get(), "SysexExchange started");
        Ok(Self {
            shared,
            transport,
            sink,
            listener_id,
            deadline: DEFAULT_RESPONSE_DEADLINE,
        })
    }

    /// Create an exchange for a K5000 using `config`
    pub fn from_config(
        transport: Arc<dyn MidiTransport>,
        config: &ExchangeConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ExchangeError> {
        debug!(?config, "SysexExchange::from_config: called");
        let channel = Channel::new(config.channel)?;
        Ok(Self::new(transport, k5000::response_table(channel), sink)?.with_deadline(config.response_timeout()))
    }

    /// Override the response deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        debug!(?deadline, "SysexExchange::with_deadline: called");
        self.deadline = deadline;
        self
    }

    /// Send the payload produced by `producer` and wait for a matching reply
    ///
    /// Returns the cycle number once the request is on the wire. The outcome
    /// is published later as `ResponseReceived` or `ResponseTimedOut`.
    /// Fails without touching the in-flight cycle if one is still armed, and
    /// leaves nothing armed if the transport refuses the send. A reply that
    /// matches while a failing send is still returning resolves the cycle
    /// first: `ResponseReceived` is published and the send error is still
    /// returned.
    pub fn request<P>(&self, producer: P) -> Result<u64, ExchangeError>
    where
        P: FnOnce() -> Vec<u8>,
    {
        debug!(deadline = ?self.deadline, "SysexExchange::request: called");
        let counters = &self.shared.counters;

        let transport = Arc::clone(&self.transport);
        let send = move || -> Result<(), ExchangeError> {
            let payload = producer();
            debug!(len = payload.len(), "SysexExchange::request: sending payload");
            transport.send_frame(&payload)?;
            Ok(())
        };

        let sink = Arc::clone(&self.sink);
        let received = Arc::clone(counters);
        let on_success = move || {
            Counters::bump(&received.responses_received);
            sink.publish(ExchangeEvent::ResponseReceived);
        };

        let sink = Arc::clone(&self.sink);
        let timed_out = Arc::clone(counters);
        let on_timeout = move || {
            Counters::bump(&timed_out.timeouts);
            sink.publish(ExchangeEvent::ResponseTimedOut);
        };

        match self
            .shared
            .guard
            .perform_with_deadline(send, self.deadline, on_success, on_timeout)
        {
            Ok(cycle) => {
                Counters::bump(&counters.requests_sent);
                info!(cycle, "SysexExchange: request sent");
                Ok(cycle)
            }
            Err(e) => {
                if e.is_reentrant() {
                    Counters::bump(&counters.requests_rejected);
                } else {
                    Counters::bump(&counters.send_failures);
                }
                warn!(error = %e, "SysexExchange: request failed");
                Err(e)
            }
        }
    }

    /// Feed one inbound frame, as the transport listener does
    pub fn on_inbound_frame(&self, frame: &[u8]) {
        self.shared.on_inbound_frame(frame);
    }

    pub fn state(&self) -> GuardState {
        self.shared.guard.state()
    }

    /// Whether a request is waiting for its reply
    pub fn is_awaiting(&self) -> bool {
        self.shared.guard.is_armed()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn table(&self) -> &ResponseTable {
        &self.shared.table
    }

    pub fn metrics(&self) -> ExchangeMetrics {
        self.shared.counters.snapshot()
    }
}

impl Drop for SysexExchange {
    fn drop(&mut self) {
        self.transport.unregister_listener(self.listener_id);
        info!(listener_id = self.listener_id.get(), "SysexExchange stopped");
    }
}
