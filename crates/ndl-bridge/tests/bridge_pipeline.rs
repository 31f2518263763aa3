//! Integration tests for the data path between serial channels and the
//! bridge queues.
//!
//! These tests exercise the application layer of ndl-bridge end-to-end:
//! `SerialPoller` + `HostDrain` + `Heartbeat` + the periodic scheduler, with
//! in-memory serial ports.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use ndl_bridge::application::ports::WaitPolicy;
use ndl_bridge::application::pump::{Heartbeat, HostDrain, SerialPoller};
use ndl_bridge::application::registry::ChannelRegistry;
use ndl_bridge::application::signal::SharedMode;
use ndl_bridge::infrastructure::mock::{LoggingIndicator, MemorySerialPort};
use ndl_bridge::infrastructure::scheduler::{spawn_heartbeat, BridgeTasks, TaskSettings};
use ndl_core::protocol::envelope::HEADER_SIZE;
use ndl_core::{
    decode_envelope, encode_envelope, BridgeQueue, Command, EnvelopeAssembler, Mode, Topic,
    TopicKey,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Bridge {
    host: Arc<MemorySerialPort>,
    a: Arc<MemorySerialPort>,
    b: Arc<MemorySerialPort>,
    registry: Arc<ChannelRegistry>,
    to_network: Arc<BridgeQueue>,
    to_host: Arc<BridgeQueue>,
}

fn bridge(capacity: usize) -> Bridge {
    let host = Arc::new(MemorySerialPort::new());
    let a = Arc::new(MemorySerialPort::new());
    let b = Arc::new(MemorySerialPort::new());
    let mut registry = ChannelRegistry::new();
    registry
        .register_host(Topic::new("uart_cdc", 256), host.clone())
        .unwrap();
    registry.register(Topic::new("uart1", 256), a.clone()).unwrap();
    registry.register(Topic::new("uart2", 256), b.clone()).unwrap();
    Bridge {
        host,
        a,
        b,
        registry: Arc::new(registry),
        to_network: Arc::new(BridgeQueue::new("network-bound", capacity)),
        to_host: Arc::new(BridgeQueue::new("host-bound", capacity)),
    }
}

fn drain(b: &Bridge) -> HostDrain {
    HostDrain::new(
        Arc::clone(&b.registry),
        Arc::clone(&b.to_host),
        256,
        4096,
        WaitPolicy::Bounded(Duration::from_millis(20)),
    )
}

fn frames(bytes: &[u8]) -> Vec<(TopicKey, Vec<u8>)> {
    let mut assembler = EnvelopeAssembler::new(4096);
    assembler.push(bytes);
    std::iter::from_fn(|| assembler.next_frame())
        .map(|f| (f.key(), f.payload().to_vec()))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_serial_bytes_round_trip_through_both_queues_to_the_same_channel() {
    // Arrange
    let b = bridge(4096);
    let mut poller = SerialPoller::new(Arc::clone(&b.registry), Arc::clone(&b.to_network));
    b.a.feed(&[0x01, 0x02, 0x03]);

    // Act – one polling cycle
    poller.poll_once();

    // Assert – exactly one envelope with uart1's key and the bytes read
    let queued = b.to_network.pop(4096);
    let (view, used) = decode_envelope(&queued).unwrap();
    assert_eq!(view.key, TopicKey::from_name("uart1"));
    assert_eq!(view.payload, &[0x01, 0x02, 0x03]);
    assert_eq!(used, queued.len());

    // Act – inject the same envelope toward the host side and drain
    b.to_host.push(&queued).unwrap();
    drain(&b).drain_once();

    // Assert – only uart1 was written, with the payload alone
    assert_eq!(b.a.writes(), vec![vec![0x01, 0x02, 0x03]]);
    assert!(b.b.writes().is_empty());
    assert!(b.host.writes().is_empty());
}

#[test]
fn test_host_channel_input_is_enveloped_and_its_inbound_data_written_raw() {
    let b = bridge(4096);
    let mut poller = SerialPoller::new(Arc::clone(&b.registry), Arc::clone(&b.to_network));
    b.host.feed(b"log line\n");

    poller.poll_once();

    let queued = frames(&b.to_network.pop(4096));
    assert_eq!(
        queued,
        vec![(TopicKey::from_name("uart_cdc"), b"log line\n".to_vec())]
    );

    let inbound = encode_envelope(TopicKey::from_name("uart_cdc"), b"reply", 256).unwrap();
    b.to_host.push(&inbound).unwrap();
    drain(&b).drain_once();
    assert_eq!(b.host.written(), b"reply");
}

#[test]
fn test_control_envelopes_reach_the_host_whole() {
    // Arrange
    let b = bridge(4096);
    let heartbeat = Heartbeat::new(Arc::clone(&b.to_host));
    let data = encode_envelope(TopicKey::from_name("uart2"), &[7, 7], 256).unwrap();

    // Act
    heartbeat.beat().unwrap();
    b.to_host.push(&data).unwrap();
    drain(&b).drain_once();

    // Assert
    let ping = Command::Ping.to_envelope().unwrap();
    assert_eq!(b.host.writes(), vec![ping]);
    assert_eq!(b.b.writes(), vec![vec![7, 7]]);
    assert!(b.a.writes().is_empty());
}

#[test]
fn test_full_network_queue_drops_the_whole_batch() {
    // Arrange – room for one 16-byte frame only
    let b = bridge(20);
    let mut poller = SerialPoller::new(Arc::clone(&b.registry), Arc::clone(&b.to_network));
    b.a.feed(&[1, 2, 3]);
    b.b.feed(&[4, 5, 6]);

    // Act
    let stats = poller.poll_once();

    // Assert – one channel got through, the other batch was dropped intact
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.dropped_frames, 1);
    assert_eq!(b.to_network.len(), HEADER_SIZE + 3);
    assert_eq!(frames(&b.to_network.pop(20)).len(), 1);
}

#[test]
fn test_corrupted_bytes_between_envelopes_are_skipped() {
    let b = bridge(4096);
    let first = encode_envelope(TopicKey::from_name("uart1"), b"one", 256).unwrap();
    let second = encode_envelope(TopicKey::from_name("uart2"), b"two", 256).unwrap();
    let mut stream = first.clone();
    stream.extend_from_slice(&[0xA5, 0x00, 0xFF, 0x13]);
    stream.extend_from_slice(&second);
    b.to_host.push(&stream).unwrap();

    drain(&b).drain_once();

    assert_eq!(b.a.written(), b"one");
    assert_eq!(b.b.written(), b"two");
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_enqueues_ten_pings_in_ten_seconds() {
    // Arrange
    let to_host = Arc::new(BridgeQueue::new("host-bound", 4096));
    let running = Arc::new(AtomicBool::new(true));
    let _task = spawn_heartbeat(
        Heartbeat::new(Arc::clone(&to_host)),
        Duration::from_secs(1),
        Arc::clone(&running),
    );

    // Act
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    // Assert
    let pings = frames(&to_host.pop(4096));
    assert!(
        (9..=11).contains(&pings.len()),
        "expected 10 ± 1 pings, got {}",
        pings.len()
    );
    assert!(pings
        .iter()
        .all(|(key, payload)| *key == Command::topic_key() && payload == &[0]));
    running.store(false, std::sync::atomic::Ordering::SeqCst);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_tasks_move_data_and_show_the_mode() {
    // Arrange
    let b = bridge(4096);
    let indicator = Arc::new(LoggingIndicator::new());
    let mode = Arc::new(SharedMode::new());
    let running = Arc::new(AtomicBool::new(true));
    let tasks = BridgeTasks {
        registry: Arc::clone(&b.registry),
        to_network: Arc::clone(&b.to_network),
        to_host: Arc::clone(&b.to_host),
        indicator: indicator.clone(),
        mode: Arc::clone(&mode),
    }
    .spawn(
        &TaskSettings {
            serial_poll: Duration::from_millis(2),
            host_flush: Duration::from_millis(2),
            flush_batch: 4096,
            max_payload: 256,
            serial_write_wait: Duration::from_millis(20),
            heartbeat: Duration::from_secs(1),
            status: Duration::from_millis(50),
        },
        &running,
    );
    assert_eq!(tasks.len(), 4);

    // Act
    b.a.feed(b"abc");
    b.to_host
        .push(&encode_envelope(TopicKey::from_name("uart2"), b"xyz", 256).unwrap())
        .unwrap();
    mode.set(Mode::Scanning);
    tokio::time::sleep(Duration::from_millis(100)).await;
    running.store(false, std::sync::atomic::Ordering::SeqCst);
    tasks.join().await;

    // Assert
    assert_eq!(
        frames(&b.to_network.pop(4096)),
        vec![(TopicKey::from_name("uart1"), b"abc".to_vec())]
    );
    assert_eq!(b.b.written(), b"xyz");
    assert_eq!(indicator.blink_rates.lock().unwrap().last(), Some(&4));
}
