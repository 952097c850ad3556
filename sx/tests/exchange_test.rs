//! Integration tests for the sysex exchange
//!
//! These drive a SysexExchange over a loopback transport end to end and
//! observe outcomes only through the event bus, the way an application would.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sysexchange::events::{EventBus, ExchangeEvent};
use sysexchange::exchange::{ExchangeConfig, ExchangeError, SysexExchange};
use sysexchange::guard::GuardState;
use sysexchange::k5000::{self, Channel, DumpRequest, MemoryArea};
use sysexchange::matcher::{HeaderPattern, ResponseTable};
use sysexchange::transport::{LoopbackTransport, SimulatedDevice, SimulatorConfig, TransportError};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::TryRecvError;

const SINGLE_A_REPLY: [u8; 12] = [0xF0, 0x40, 0x00, 0x20, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x12, 0x34, 0xF7];

struct Rig {
    transport: Arc<LoopbackTransport>,
    exchange: SysexExchange,
    events: Receiver<ExchangeEvent>,
}

fn rig(deadline: Duration) -> Rig {
    let transport = Arc::new(LoopbackTransport::new());
    let bus = Arc::new(EventBus::new(16));
    let events = bus.subscribe();
    let exchange = SysexExchange::from_config(transport.clone(), &ExchangeConfig::default(), bus)
        .expect("Failed to create exchange")
        .with_deadline(deadline);
    Rig {
        transport,
        exchange,
        events,
    }
}

fn single_a_request() -> Vec<u8> {
    DumpRequest::one(Channel::default(), MemoryArea::SingleA, 0)
        .expect("Patch 0 is valid")
        .to_bytes()
}

fn deliver_after(transport: &Arc<LoopbackTransport>, delay: Duration, frame: &'static [u8]) {
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        transport.deliver(frame);
    });
}

// =============================================================================
// Resolution scenarios
// =============================================================================

#[tokio::test]
async fn test_no_reply_times_out_once() {
    let mut rig = rig(Duration::from_millis(100));
    let started = Instant::now();

    rig.exchange.request(single_a_request).expect("Failed to send request");

    let event = rig.events.recv().await.expect("Bus closed");
    assert_eq!(event, ExchangeEvent::ResponseTimedOut);
    assert!(started.elapsed() >= Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(rig.events.try_recv(), Err(TryRecvError::Empty)));

    let metrics = rig.exchange.metrics();
    assert_eq!(metrics.timeouts, 1);
    assert_eq!(metrics.responses_received, 0);
}

#[tokio::test]
async fn test_matching_reply_resolves_before_deadline() {
    let mut rig = rig(Duration::from_secs(44));
    let started = Instant::now();

    rig.exchange.request(single_a_request).expect("Failed to send request");
    deliver_after(&rig.transport, Duration::from_millis(10), &SINGLE_A_REPLY);

    let event = rig.events.recv().await.expect("Bus closed");
    let elapsed = started.elapsed();
    assert_eq!(event, ExchangeEvent::ResponseReceived);
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_secs(2), "resolved too late: {elapsed:?}");
    assert_eq!(rig.exchange.state(), GuardState::Resolved);
    assert!(!rig.exchange.is_awaiting());
}

#[tokio::test]
async fn test_matched_reply_leaves_no_late_timeout() {
    let mut rig = rig(Duration::from_millis(150));

    rig.exchange.request(single_a_request).expect("Failed to send request");
    deliver_after(&rig.transport, Duration::from_millis(10), &SINGLE_A_REPLY);

    assert_eq!(rig.events.recv().await.unwrap(), ExchangeEvent::ResponseReceived);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(matches!(rig.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(rig.exchange.metrics().timeouts, 0);
}

#[tokio::test]
async fn test_second_request_while_armed_is_rejected() {
    let rig = rig(Duration::from_secs(44));

    let first = rig.exchange.request(single_a_request).expect("Failed to send request");
    let second = rig.exchange.request(single_a_request);

    match second {
        Err(e) => assert!(e.is_reentrant(), "unexpected error: {e}"),
        Ok(cycle) => panic!("re-entrant request accepted as cycle {cycle}"),
    }
    assert_eq!(rig.transport.sent_frames().len(), 1);
    assert_eq!(rig.exchange.metrics().requests_rejected, 1);

    // The first cycle is still live and resolves normally
    rig.transport.deliver(&SINGLE_A_REPLY);
    assert_eq!(rig.exchange.state(), GuardState::Resolved);
    assert_eq!(first, 1);
}

#[tokio::test]
async fn test_late_duplicate_reply_is_ignored() {
    let mut rig = rig(Duration::from_secs(44));

    rig.exchange.request(single_a_request).expect("Failed to send request");
    rig.transport.deliver(&SINGLE_A_REPLY);
    assert_eq!(rig.events.recv().await.unwrap(), ExchangeEvent::ResponseReceived);

    let before = rig.exchange.metrics();
    rig.transport.deliver(&SINGLE_A_REPLY);

    assert!(matches!(rig.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(rig.exchange.state(), GuardState::Resolved);
    let after = rig.exchange.metrics();
    assert_eq!(after.responses_received, before.responses_received);
    assert_eq!(after.frames_late, before.frames_late + 1);
}

#[tokio::test]
async fn test_reply_after_timeout_is_ignored() {
    let mut rig = rig(Duration::from_millis(30));

    rig.exchange.request(single_a_request).expect("Failed to send request");
    assert_eq!(rig.events.recv().await.unwrap(), ExchangeEvent::ResponseTimedOut);

    rig.transport.deliver(&SINGLE_A_REPLY);
    assert!(matches!(rig.events.try_recv(), Err(TryRecvError::Empty)));
}

// =============================================================================
// Frame filtering
// =============================================================================

#[tokio::test]
async fn test_unrelated_traffic_does_not_resolve() {
    let mut rig = rig(Duration::from_millis(120));

    rig.exchange.request(single_a_request).expect("Failed to send request");

    // Note-on, universal sysex identity reply, a truncated K5000 header, another vendor
    rig.transport.deliver(&[0x90, 0x3C, 0x7F]);
    rig.transport.deliver(&[0xF0, 0x7E, 0x00, 0x06, 0x02, 0x40, 0xF7]);
    rig.transport.deliver(&[0xF0, 0x40, 0x00, 0x20, 0x00]);
    rig.transport.deliver(&[0xF0, 0x41, 0x00, 0x20, 0x00, 0x0A, 0x00, 0x00, 0xF7]);
    assert!(rig.exchange.is_awaiting());

    assert_eq!(rig.events.recv().await.unwrap(), ExchangeEvent::ResponseTimedOut);
    let metrics = rig.exchange.metrics();
    assert_eq!(metrics.frames_ignored, 1);
    assert_eq!(metrics.frames_unmatched, 3);
}

#[tokio::test]
async fn test_any_table_entry_resolves() {
    let mut rig = rig(Duration::from_secs(44));
    let table = k5000::response_table(Channel::default());

    for pattern in table.iter() {
        rig.exchange.request(single_a_request).expect("Failed to send request");
        let mut frame = pattern.bytes().to_vec();
        frame.extend_from_slice(&[0x01, 0x02, 0xF7]);
        rig.transport.deliver(&frame);
        assert_eq!(
            rig.events.recv().await.unwrap(),
            ExchangeEvent::ResponseReceived,
            "{} did not resolve",
            pattern.label()
        );
    }
    assert_eq!(rig.exchange.metrics().responses_received, table.len() as u64);
}

#[tokio::test]
async fn test_custom_table() {
    let transport = Arc::new(LoopbackTransport::new());
    let bus = Arc::new(EventBus::new(4));
    let mut events = bus.subscribe();
    let table = ResponseTable::new(vec![HeaderPattern::new("ack", [0xF0, 0x7E, 0x00, 0x7F, 0x00, 0x01])]);
    let exchange = SysexExchange::new(transport.clone(), table, bus).unwrap();

    exchange.request(|| vec![0xF0, 0x7E, 0x00, 0x01, 0xF7]).unwrap();
    transport.deliver(&[0xF0, 0x7E, 0x00, 0x7F, 0x00, 0x01, 0xF7]);

    assert_eq!(events.recv().await.unwrap(), ExchangeEvent::ResponseReceived);
}

// =============================================================================
// Failure handling and lifecycle
// =============================================================================

#[tokio::test]
async fn test_send_failure_leaves_nothing_armed() {
    let mut rig = rig(Duration::from_millis(40));
    rig.transport.set_fail_sends(true);

    let result = rig.exchange.request(single_a_request);
    assert!(matches!(result, Err(ExchangeError::Transport(TransportError::SendFailed(_)))));
    assert!(!rig.exchange.is_awaiting());

    // No stray timeout from the aborted cycle
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(matches!(rig.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(rig.exchange.metrics().send_failures, 1);

    rig.transport.set_fail_sends(false);
    rig.exchange.request(single_a_request).expect("Retry after failure should start a cycle");
    assert!(rig.exchange.is_awaiting());
}

#[tokio::test]
async fn test_drop_while_awaiting_publishes_timeout() {
    let Rig {
        transport,
        exchange,
        mut events,
    } = rig(Duration::from_millis(50));

    exchange.request(single_a_request).expect("Failed to send request");
    drop(exchange);

    let event = tokio::time::timeout(Duration::from_millis(500), events.recv())
        .await
        .expect("No outcome after dropping mid-request")
        .expect("Bus closed");
    assert_eq!(event, ExchangeEvent::ResponseTimedOut);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty | TryRecvError::Closed)));
    assert_eq!(transport.listener_count(), 0);
}

#[tokio::test]
async fn test_drop_unregisters_listener() {
    let rig = rig(Duration::from_secs(44));
    assert_eq!(rig.transport.listener_count(), 1);

    let Rig { transport, exchange, .. } = rig;
    drop(exchange);
    assert_eq!(transport.listener_count(), 0);

    // Delivering to a transport with no listeners is harmless
    transport.deliver(&SINGLE_A_REPLY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reply_racing_deadline_resolves_exactly_once() {
    let mut rig = rig(Duration::from_millis(8));

    for i in 0..30u64 {
        rig.exchange.request(single_a_request).expect("Failed to send request");

        let transport = Arc::clone(&rig.transport);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(4 + i % 8));
            transport.deliver(&SINGLE_A_REPLY);
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        thread.join().unwrap();

        let mut outcomes = 0;
        while let Ok(_event) = rig.events.try_recv() {
            outcomes += 1;
        }
        assert_eq!(outcomes, 1, "iteration {i}: expected exactly one outcome");
    }

    let metrics = rig.exchange.metrics();
    assert_eq!(metrics.responses_received + metrics.timeouts, 30);
}

#[tokio::test]
async fn test_simulated_device_round_trip() {
    let device = Arc::new(SimulatedDevice::new(
        SimulatorConfig {
            reply_delay_ms: 5,
            ..Default::default()
        },
        tokio::runtime::Handle::current(),
    ));
    let bus = Arc::new(EventBus::new(4));
    let mut events = bus.subscribe();
    let exchange = SysexExchange::from_config(device.clone(), &ExchangeConfig::default(), bus).unwrap();

    let request = DumpRequest::block(Channel::default(), MemoryArea::Drum);
    exchange.request(|| request.to_bytes()).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert_eq!(event, ExchangeEvent::ResponseReceived);
    assert_eq!(device.link().sent_frames(), vec![request.to_bytes()]);
}
