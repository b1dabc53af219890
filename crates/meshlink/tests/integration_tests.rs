//! Integration tests for the mesh communicator
//!
//! These tests drive a [`Communicator`] over [`MockTransport`] and cover:
//! - Fragmentation and reassembly through the inbound queue
//! - Send validation (unknown peers, oversized messages, partial failures)
//! - Discovery cycles, failures and forced refreshes
//! - Flood relay with loop suppression
//! - Wire format selection and malformed input

use meshlink::frame::{self, Frame};
use meshlink::{
    Communicator, DelimitedCodec, DiscoveryScript, JsonCodec, MeshConfigBuilder, MeshError,
    MessageId, MockTransport, PeerNode, TestFixture, WireCodec, WireFormat,
};
use rand::seq::SliceRandom;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

const POP_TIMEOUT: Duration = Duration::from_millis(500);

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

async fn start(fixture: TestFixture) -> (MockTransport, Communicator<MockTransport>) {
    let mock = fixture.transport.clone();
    let comm = Communicator::new(fixture.transport, fixture.config).unwrap();
    comm.connect().await.unwrap();
    (mock, comm)
}

/// Connect and wait for the first discovery cycle to populate peers
async fn start_with_peers(fixture: TestFixture) -> (MockTransport, Communicator<MockTransport>) {
    let (mock, comm) = start(fixture).await;
    assert!(wait_until(|| !comm.list_peers().is_empty()).await);
    (mock, comm)
}

fn split(id: &str, origin: &str, text: &str, part: usize) -> Vec<Frame> {
    frame::split(&MessageId::new(id).unwrap(), origin, text, part, 400).unwrap()
}

fn decode_all(raw: &[bytes::Bytes]) -> Vec<Frame> {
    raw.iter().map(|b| DelimitedCodec.decode(b).unwrap()).collect()
}

// ============================================================================
// Fragmentation and reassembly
// ============================================================================

#[tokio::test]
async fn test_sixty_chars_split_into_six_frames() {
    let (mock, comm) = start(TestFixture::small_frames(&[])).await;
    let message = "A".repeat(60);

    let receipt = comm.send(&message).await.unwrap();
    assert_eq!(receipt.frames, 6);

    let frames = decode_all(&mock.broadcasts());
    assert_eq!(frames.len(), 6);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.part_index, i);
        assert_eq!(frame.payload, "A".repeat(10));
        assert_eq!(frame.is_last, i == 5);
        assert_eq!(frame.message_id, receipt.message_id);
        assert_eq!(frame.origin_node_id, "LOCAL");
    }

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_sixty_chars_delivered_once_through_inbound_queue() {
    let (mock, comm) = start(TestFixture::small_frames(&[])).await;
    let message = "A".repeat(60);

    assert!(mock.inject_message("aB3x9", "REMOTE", &message, 10, Some("N1")).unwrap());

    let inbound = comm.inbound();
    let received = inbound.pop(POP_TIMEOUT).await.expect("message delivered");
    assert_eq!(received.message, message);
    assert_eq!(received.message_id.as_str(), "aB3x9");
    assert_eq!(received.origin_node_id, "REMOTE");
    assert_eq!(received.sender.as_deref(), Some("N1"));

    assert!(inbound.pop(Duration::from_millis(50)).await.is_none());
    assert_eq!(comm.stats().messages_completed, 1);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_any_frame_order_delivers_original() {
    let (mock, comm) = start(TestFixture::small_frames(&[])).await;
    let inbound = comm.inbound();
    let message = "Frames may arrive in any order over a mesh; the text must not.";
    let mut rng = rand::thread_rng();

    for round in 0..10 {
        let id = format!("prm{:02}", round);
        let mut frames = split(&id, "REMOTE", message, 10);
        frames.shuffle(&mut rng);
        assert!(mock.inject_frames(WireFormat::Delimited, &frames, Some("N1")));

        let received = inbound.pop(POP_TIMEOUT).await.expect("message delivered");
        assert_eq!(received.message, message);
        assert_eq!(received.message_id.as_str(), id);
    }

    assert!(inbound.pop(Duration::from_millis(50)).await.is_none());
    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_redelivered_frames_do_not_change_result() {
    let (mock, comm) = start(TestFixture::small_frames(&[])).await;
    let inbound = comm.inbound();
    let frames = split("dupe", "REMOTE", "duplicated frames are harmless", 10);

    let mut with_repeats = frames.clone();
    with_repeats.insert(1, frames[0].clone());
    with_repeats.insert(3, frames[1].clone());
    assert!(mock.inject_frames(WireFormat::Delimited, &with_repeats, None));

    let received = inbound.pop(POP_TIMEOUT).await.unwrap();
    assert_eq!(received.message, "duplicated frames are harmless");
    assert!(received.sender.is_none());

    // A late copy of the whole message is not delivered again
    assert!(mock.inject_frames(WireFormat::Delimited, &frames, None));
    assert!(inbound.pop(Duration::from_millis(50)).await.is_none());

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_interleaved_messages() {
    let (mock, comm) = start(TestFixture::small_frames(&[])).await;
    let inbound = comm.inbound();

    let a = split("msgA", "R1", "first message, three parts", 10);
    let b = split("msgB", "R2", "second one, also three", 10);
    let mut mixed = Vec::new();
    for pair in a.iter().zip(b.iter()) {
        mixed.push(pair.0.clone());
        mixed.push(pair.1.clone());
    }
    assert!(mock.inject_frames(WireFormat::Delimited, &mixed, None));

    let mut texts = vec![
        inbound.pop(POP_TIMEOUT).await.unwrap().message,
        inbound.pop(POP_TIMEOUT).await.unwrap().message,
    ];
    texts.sort();
    assert_eq!(texts, vec!["first message, three parts", "second one, also three"]);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_inbound_overflow_drops_oldest() {
    let mut fixture = TestFixture::new();
    fixture.config.inbound.capacity = 2;
    let (mock, comm) = start(fixture).await;

    for (id, text) in [("ov1", "one"), ("ov2", "two"), ("ov3", "three")] {
        mock.inject_message(id, "REMOTE", text, 50, None).unwrap();
    }
    assert!(wait_until(|| comm.stats().messages_completed == 3).await);

    let inbound = comm.inbound();
    assert_eq!(inbound.pop(POP_TIMEOUT).await.unwrap().message, "two");
    assert_eq!(inbound.pop(POP_TIMEOUT).await.unwrap().message, "three");
    assert_eq!(comm.stats().inbound_dropped, 1);

    comm.close().await.unwrap();
}

// ============================================================================
// Send validation
// ============================================================================

#[tokio::test]
async fn test_send_to_unknown_peer() {
    let (mock, comm) = start_with_peers(TestFixture::with_peers(&["N1"])).await;

    let err = comm.send_to("X1", "hello").await.unwrap_err();
    assert!(matches!(err, MeshError::PeerNotFound(ref id) if id == "X1"));
    assert!(mock.unicasts().is_empty());
    assert!(mock.broadcasts().is_empty());

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_send_to_known_peer_unicasts_every_frame() {
    let (mock, comm) = start_with_peers(TestFixture::small_frames(&["N1", "N2"])).await;

    let receipt = comm.send_to("N2", "twenty-five characters!!!").await.unwrap();
    assert_eq!(receipt.frames, 3);

    let unicasts = mock.unicasts();
    assert_eq!(unicasts.len(), 3);
    assert!(unicasts.iter().all(|(peer, _)| peer == "N2"));
    assert!(mock.broadcasts().is_empty());

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_oversized_messages_send_nothing() {
    let (mock, comm) = start_with_peers(TestFixture::with_peers(&["N1"])).await;
    let oversized = "x".repeat(401);

    let err = comm.send(&oversized).await.unwrap_err();
    assert!(matches!(err, MeshError::MessageTooLarge { size: 401, max: 400 }));

    let err = comm.send_to("N1", &oversized).await.unwrap_err();
    assert!(matches!(err, MeshError::MessageTooLarge { .. }));

    // Size is checked before the peer lookup
    let err = comm.send_to("X1", &oversized).await.unwrap_err();
    assert!(matches!(err, MeshError::MessageTooLarge { .. }));

    assert!(mock.broadcasts().is_empty());
    assert!(mock.unicasts().is_empty());

    // Exactly at the limit is fine
    assert_eq!(comm.send(&"x".repeat(400)).await.unwrap().frames, 8);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_send_after_close() {
    let (_mock, comm) = start(TestFixture::new()).await;
    comm.close().await.unwrap();

    assert!(matches!(comm.send("late").await, Err(MeshError::NotConnected)));
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_failed_cycle_keeps_peers_and_success_replaces_them() {
    let fixture = TestFixture::small_frames(&[]);
    fixture
        .transport
        .script_discovery(DiscoveryScript::Succeed(vec![
            PeerNode::new("N1", "0x01"),
            PeerNode::new("N2", "0x02"),
        ]));
    fixture.transport.script_discovery(DiscoveryScript::Fail);
    fixture.transport.script_discovery(DiscoveryScript::Silent);
    fixture
        .transport
        .script_discovery(DiscoveryScript::Succeed(vec![PeerNode::new("N3", "0x03")]));
    fixture.transport.set_peers(vec![PeerNode::new("N3", "0x03")]);

    let (_mock, comm) = start(fixture).await;

    assert!(wait_until(|| comm.list_peers() == vec!["N1", "N2"]).await);

    assert!(wait_until(|| comm.discovery_state().failures >= 1).await);
    assert_eq!(comm.list_peers(), vec!["N1", "N2"]);

    assert!(wait_until(|| comm.list_peers() == vec!["N3"]).await);
    let state = comm.discovery_state();
    assert!(state.failures >= 2);
    assert!(state.successes >= 2);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_discovery_timeouts_shrink_after_first_success() {
    let fixture = TestFixture::small_frames(&["N1"]);
    fixture.transport.script_discovery(DiscoveryScript::Fail);
    let (mock, comm) = start(fixture).await;

    assert!(wait_until(|| mock.discovery_timeouts().len() >= 3).await);
    let timeouts = mock.discovery_timeouts();
    assert_eq!(timeouts[0], Duration::from_millis(100));
    assert_eq!(timeouts[1], Duration::from_millis(100));
    assert_eq!(timeouts[2], Duration::from_millis(50));

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_refresh_clears_transport_peers_first() {
    let (mock, comm) = start_with_peers(TestFixture::small_frames(&["N1"])).await;
    assert_eq!(mock.clear_calls(), 0);

    let starts_before = mock.discovery_starts();
    comm.refresh();
    assert!(comm.discovery_state().refresh_requested);

    assert!(wait_until(|| mock.clear_calls() == 1).await);
    assert!(wait_until(|| mock.discovery_starts() > starts_before).await);
    assert!(!comm.discovery_state().refresh_requested);

    comm.close().await.unwrap();
}

// ============================================================================
// Flood relay
// ============================================================================

#[tokio::test]
async fn test_relay_forwards_to_all_but_sender() {
    let (mock, comm) = start_with_peers(TestFixture::small_frames(&["N1", "N2", "N3"])).await;

    mock.inject_message("fld", "FAR", "flood me onward", 10, Some("N2"))
        .unwrap();
    assert!(wait_until(|| mock.unicasts().len() == 4).await);

    let unicasts = mock.unicasts();
    assert!(unicasts.iter().all(|(peer, _)| peer != "N2"));
    for (_, raw) in &unicasts {
        let frame = DelimitedCodec.decode(raw).unwrap();
        assert_eq!(frame.message_id.as_str(), "fld");
        assert_eq!(frame.origin_node_id, "FAR");
    }

    // The message came back around the mesh: no second delivery, no second relay
    mock.inject_message("fld", "FAR", "flood me onward", 10, Some("N3"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.unicasts().len(), 4);
    assert_eq!(comm.stats().messages_relayed, 1);

    let inbound = comm.inbound();
    assert!(inbound.pop(POP_TIMEOUT).await.is_some());
    assert!(inbound.pop(Duration::from_millis(50)).await.is_none());

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_own_messages_are_not_relayed() {
    let (mock, comm) = start_with_peers(TestFixture::small_frames(&["N1", "N2"])).await;

    let receipt = comm.send("round trip").await.unwrap();
    let echo = decode_all(&mock.broadcasts());
    assert!(mock.inject_frames(WireFormat::Delimited, &echo, Some("N1")));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(mock.unicasts().is_empty());
    assert!(comm.inbound().try_pop().is_none());
    assert_eq!(comm.stats().own_echoes, 1);
    assert_eq!(receipt.frames, 1);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_relay_disabled() {
    let mut fixture = TestFixture::small_frames(&["N1", "N2"]);
    fixture.config.relay.enabled = false;
    let (mock, comm) = start_with_peers(fixture).await;

    mock.inject_message("nrl", "FAR", "stay here", 10, Some("N1"))
        .unwrap();
    assert!(comm.inbound().pop(POP_TIMEOUT).await.is_some());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(mock.unicasts().is_empty());

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_two_nodes_over_a_shared_link() {
    let (mock_a, node_a) = start(TestFixture::small_frames(&[])).await;

    let fixture_b = TestFixture {
        transport: MockTransport::new("NODE-B"),
        ..TestFixture::small_frames(&[])
    };
    let (mock_b, node_b) = start(fixture_b).await;

    let message = "Hello from A, carried in several small frames.";
    node_a.send(message).await.unwrap();
    for raw in mock_a.broadcasts() {
        assert!(mock_b.inject_raw(raw, Some("LOCAL")));
    }

    let received = node_b.inbound().pop(POP_TIMEOUT).await.unwrap();
    assert_eq!(received.message, message);
    assert_eq!(received.origin_node_id, "LOCAL");

    node_a.close().await.unwrap();
    node_b.close().await.unwrap();
}

// ============================================================================
// Wire formats and bad input
// ============================================================================

#[tokio::test]
async fn test_json_wire_format() {
    let config = MeshConfigBuilder::new()
        .max_part_len(10)
        .wire_format(WireFormat::Json)
        .build();
    let mock = MockTransport::new("LOCAL");
    let comm = Communicator::new(mock.clone(), config).unwrap();
    comm.connect().await.unwrap();

    comm.send("json over the air").await.unwrap();
    let frames: Vec<Frame> = mock
        .broadcasts()
        .iter()
        .map(|raw| JsonCodec.decode(raw).unwrap())
        .collect();
    assert_eq!(frames.len(), 2);
    assert!(frames[1].is_last);

    let incoming = split("jsn", "REMOTE", "reply in json", 10);
    assert!(mock.inject_frames(WireFormat::Json, &incoming, None));
    assert_eq!(
        comm.inbound().pop(POP_TIMEOUT).await.unwrap().message,
        "reply in json"
    );

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let (mock, comm) = start(TestFixture::new()).await;

    assert!(mock.inject_raw(&b"only\x1Ftwo"[..], Some("N1")));
    assert!(mock.inject_raw(&b"abc\x1Fzero\x1Fx\x1FR\x1F1"[..], Some("N1")));
    assert!(mock.inject_raw(vec![0xFF, 0xFE], None));
    mock.inject_message("okay", "REMOTE", "still works", 50, None)
        .unwrap();

    let received = comm.inbound().pop(POP_TIMEOUT).await.unwrap();
    assert_eq!(received.message, "still works");
    assert_eq!(comm.stats().malformed_frames, 3);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn test_payload_with_separator_survives() {
    let (mock, comm) = start(TestFixture::new()).await;

    let receipt = comm.send("a\u{1F}b\\c").await.unwrap();
    let frame = DelimitedCodec.decode(&mock.broadcasts()[0]).unwrap();
    assert_eq!(frame.payload, "a\u{1F}b\\c");
    assert_eq!(frame.message_id, receipt.message_id);

    comm.close().await.unwrap();
}
