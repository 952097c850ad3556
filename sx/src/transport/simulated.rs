//! Simulated K5000 on a loopback transport
//!
//! Every dump request sent through the device is answered with the matching
//! dump header, a payload of `payload-len` data bytes and `F7`, after
//! `reply-delay-ms`. Replies are dropped with probability `drop-rate`.
//! Anything that is not a dump request is swallowed, like a real synth would.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::{FrameListener, ListenerId, LoopbackTransport, MidiTransport, TransportError};
use crate::k5000::DumpRequest;
use crate::matcher::SYSEX_END;

/// Simulated device behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Delay before the reply is delivered
    #[serde(rename = "reply-delay-ms")]
    pub reply_delay_ms: u64,

    /// Probability (0.0-1.0) that a reply is silently lost
    #[serde(rename = "drop-rate")]
    pub drop_rate: f64,

    /// Number of data bytes between the header and F7
    #[serde(rename = "payload-len")]
    pub payload_len: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: 10,
            drop_rate: 0.0,
            payload_len: 16,
        }
    }
}

impl SimulatorConfig {
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }
}

pub struct SimulatedDevice {
    link: Arc<LoopbackTransport>,
    config: SimulatorConfig,
    runtime: Handle,
}

impl SimulatedDevice {
    /// Create a device replying on `runtime`
    pub fn new(config: SimulatorConfig, runtime: Handle) -> Self {
        debug!(?config, "SimulatedDevice::new: called");
        Self {
            link: Arc::new(LoopbackTransport::new()),
            config,
            runtime,
        }
    }

    /// The underlying loopback link (for injecting extra traffic)
    pub fn link(&self) -> &Arc<LoopbackTransport> {
        &self.link
    }

    fn reply_for(&self, request: &DumpRequest) -> Vec<u8> {
        let mut reply = request.response_header().bytes().to_vec();
        reply.extend((0..self.config.payload_len).map(|i| (i % 0x80) as u8));
        reply.push(SYSEX_END);
        reply
    }

    fn should_drop(&self) -> bool {
        let rate = self.config.drop_rate.clamp(0.0, 1.0);
        rate > 0.0 && rand::rng().random_bool(rate)
    }
}

impl MidiTransport for SimulatedDevice {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.link.send_frame(frame)?;

        let Some(request) = DumpRequest::parse(frame) else {
            debug!(len = frame.len(), "SimulatedDevice: not a dump request, ignoring");
            return Ok(());
        };

        if self.should_drop() {
            info!(?request, "SimulatedDevice: dropping reply");
            return Ok(());
        }

        let reply = self.reply_for(&request);
        let delay = self.config.reply_delay();
        let link = Arc::clone(&self.link);
        debug!(?request, ?delay, len = reply.len(), "SimulatedDevice: scheduling reply");
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            link.deliver(&reply);
        });
        Ok(())
    }

    fn register_listener(&self, listener: FrameListener) -> Result<ListenerId, TransportError> {
        self.link.register_listener(listener)
    }

    fn unregister_listener(&self, id: ListenerId) {
        self.link.unregister_listener(id);
    }
}
