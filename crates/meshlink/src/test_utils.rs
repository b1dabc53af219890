//! Test utilities for exercising the communicator without a radio
//!
//! [`MockTransport`] stands in for a real link: it records every frame the
//! protocol layer hands it, lets tests inject inbound frames, and answers
//! discovery runs from a script. Clones share state, so a test can keep a
//! handle after moving the transport into a [`Communicator`].
//!
//! # Example
//!
//! ```rust,ignore
//! use meshlink::test_utils::{MockTransport, DiscoveryScript};
//! use meshlink::{Communicator, MeshConfig, PeerNode};
//!
//! let mock = MockTransport::new("LOCAL");
//! mock.set_peers(vec![PeerNode::new("N1", "0x01")]);
//!
//! let comm = Communicator::new(mock.clone(), MeshConfig::default())?;
//! comm.connect().await?;
//! comm.send("hello").await?;
//! assert_eq!(mock.broadcasts().len(), 1);
//! ```
//!
//! [`Communicator`]: crate::Communicator

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::codec_for;
use crate::config::{MeshConfig, MeshConfigBuilder, WireFormat};
use crate::error::{MeshError, Result};
use crate::frame::{self, Frame, MessageId};
use crate::peers::PeerNode;
use crate::transport::{Transport, TransportEvent};

/// How the mock answers one discovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryScript {
    /// Report success with these peers
    Succeed(Vec<PeerNode>),
    /// Report a failed run
    Fail,
    /// Never report an outcome
    Silent,
    /// Reject `start_discovery`
    StartError,
}

#[derive(Debug, Default)]
struct MockState {
    events: Option<mpsc::Sender<TransportEvent>>,
    open: bool,
    open_calls: usize,
    fail_open: bool,
    peers: Vec<PeerNode>,
    script: VecDeque<DiscoveryScript>,
    discovery_starts: usize,
    discovery_timeouts: Vec<Duration>,
    clear_calls: usize,
    broadcasts: Vec<Bytes>,
    unicasts: Vec<(String, Bytes)>,
    send_calls: usize,
    failing_sends: HashSet<usize>,
    fail_all_sends: bool,
}

/// Scriptable in-memory transport
#[derive(Debug, Clone)]
pub struct MockTransport {
    node_id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a mock for the given local node id
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Peers reported by discovery runs that have no script entry
    pub fn set_peers(&self, peers: Vec<PeerNode>) {
        self.state.lock().peers = peers;
    }

    /// Queue the answer for an upcoming discovery run
    pub fn script_discovery(&self, script: DiscoveryScript) {
        self.state.lock().script.push_back(script);
    }

    /// Make `open` fail
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Fail the sends with these 0-based ordinals (broadcast and unicast share the count)
    pub fn fail_sends_at(&self, ordinals: impl IntoIterator<Item = usize>) {
        self.state.lock().failing_sends.extend(ordinals);
    }

    /// Fail every send
    pub fn fail_all_sends(&self, fail: bool) {
        self.state.lock().fail_all_sends = fail;
    }

    /// Deliver raw bytes as if received from `sender`
    ///
    /// Returns `false` when the transport is closed or the event channel is full.
    pub fn inject_raw(&self, data: impl Into<Bytes>, sender: Option<&str>) -> bool {
        self.emit(TransportEvent::FrameReceived {
            data: data.into(),
            sender: sender.map(str::to_string),
        })
    }

    /// Encode and deliver frames in the given order
    pub fn inject_frames(&self, format: WireFormat, frames: &[Frame], sender: Option<&str>) -> bool {
        let codec = codec_for(format);
        frames
            .iter()
            .all(|frame| self.inject_raw(codec.encode(frame), sender))
    }

    /// Split a message and deliver all of its frames in order
    pub fn inject_message(
        &self,
        message_id: &str,
        origin: &str,
        text: &str,
        max_part_len: usize,
        sender: Option<&str>,
    ) -> Result<bool> {
        let id = MessageId::new(message_id)?;
        let frames = frame::split(&id, origin, text, max_part_len, usize::MAX)?;
        Ok(self.inject_frames(WireFormat::Delimited, &frames, sender))
    }

    /// Report a discovery outcome outside of any scripted run
    pub fn emit_discovery(&self, success: bool, peers: Vec<PeerNode>) -> bool {
        self.emit(TransportEvent::DiscoveryFinished { success, peers })
    }

    /// Frames handed to `broadcast`
    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.state.lock().broadcasts.clone()
    }

    /// Frames handed to `unicast`, with the target node id
    pub fn unicasts(&self) -> Vec<(String, Bytes)> {
        self.state.lock().unicasts.clone()
    }

    /// Forget recorded frames
    pub fn clear_sent(&self) {
        let mut state = self.state.lock();
        state.broadcasts.clear();
        state.unicasts.clear();
    }

    /// Number of `clear_known_peers` calls
    pub fn clear_calls(&self) -> usize {
        self.state.lock().clear_calls
    }

    /// Number of `start_discovery` calls
    pub fn discovery_starts(&self) -> usize {
        self.state.lock().discovery_starts
    }

    /// Timeouts passed to `set_discovery_timeout`, in call order
    pub fn discovery_timeouts(&self) -> Vec<Duration> {
        self.state.lock().discovery_timeouts.clone()
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of `open` calls
    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let events = {
            let state = self.state.lock();
            if !state.open {
                return false;
            }
            state.events.clone()
        };
        events.is_some_and(|tx| tx.try_send(event).is_ok())
    }

    fn record_send(&self, target: Option<&str>, frame: Bytes) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(MeshError::NotConnected);
        }

        let ordinal = state.send_calls;
        state.send_calls += 1;
        if state.fail_all_sends || state.failing_sends.contains(&ordinal) {
            return Err(MeshError::TransportSend(format!(
                "simulated failure on send {}",
                ordinal
            )));
        }

        match target {
            Some(node_id) => state.unicasts.push((node_id.to_string(), frame)),
            None => state.broadcasts.push(frame),
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if state.fail_open {
            return Err(MeshError::TransportSend("simulated open failure".to_string()));
        }
        state.events = Some(events);
        state.open = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.open = false;
        state.events = None;
        Ok(())
    }

    fn local_node_id(&self) -> String {
        self.node_id.clone()
    }

    async fn broadcast(&self, frame: Bytes) -> Result<()> {
        self.record_send(None, frame)
    }

    async fn unicast(&self, peer: &PeerNode, frame: Bytes) -> Result<()> {
        self.record_send(Some(&peer.node_id), frame)
    }

    async fn set_discovery_timeout(&self, timeout: Duration) -> Result<()> {
        self.state.lock().discovery_timeouts.push(timeout);
        Ok(())
    }

    async fn start_discovery(&self) -> Result<()> {
        let script = {
            let mut state = self.state.lock();
            state.discovery_starts += 1;
            let peers = state.peers.clone();
            state
                .script
                .pop_front()
                .unwrap_or(DiscoveryScript::Succeed(peers))
        };
        debug!(script = ?script, "Mock discovery started");

        match script {
            DiscoveryScript::Succeed(peers) => {
                self.emit_discovery(true, peers);
            }
            DiscoveryScript::Fail => {
                self.emit_discovery(false, Vec::new());
            }
            DiscoveryScript::Silent => {}
            DiscoveryScript::StartError => {
                return Err(MeshError::TransportSend(
                    "simulated discovery start failure".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn clear_known_peers(&self) -> Result<()> {
        self.state.lock().clear_calls += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "MockTransport"
    }
}

/// Test fixture for creating pre-configured test scenarios
pub struct TestFixture {
    /// Mock transport
    pub transport: MockTransport,
    /// Test configuration
    pub config: MeshConfig,
}

impl TestFixture {
    /// Local node "LOCAL" with default configuration and no peers
    pub fn new() -> Self {
        Self {
            transport: MockTransport::new("LOCAL"),
            config: MeshConfigBuilder::new().build(),
        }
    }

    /// Fixture whose discovery always reports the given peer ids
    pub fn with_peers(node_ids: &[&str]) -> Self {
        let fixture = Self::new();
        fixture.transport.set_peers(
            node_ids
                .iter()
                .enumerate()
                .map(|(i, id)| PeerNode::new(*id, format!("0x{:04X}", i + 1)))
                .collect(),
        );
        fixture
    }

    /// Fixture with small frames, fast discovery and relay enabled
    pub fn small_frames(node_ids: &[&str]) -> Self {
        let mut fixture = Self::with_peers(node_ids);
        fixture.config = MeshConfigBuilder::new()
            .max_part_len(10)
            .discovery_interval(Duration::from_millis(50))
            .discovery_timeouts(Duration::from_millis(100), Duration::from_millis(50))
            .build();
        fixture.config.discovery.grace = Duration::from_millis(50);
        fixture
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_sends() {
        let mock = MockTransport::new("LOCAL");
        let (tx, _rx) = mpsc::channel(8);
        mock.open(tx).await.unwrap();

        mock.broadcast(Bytes::from_static(b"one")).await.unwrap();
        mock.unicast(&PeerNode::new("N1", "a"), Bytes::from_static(b"two"))
            .await
            .unwrap();

        assert_eq!(mock.broadcasts(), vec![Bytes::from_static(b"one")]);
        assert_eq!(mock.unicasts()[0].0, "N1");
    }

    #[tokio::test]
    async fn test_mock_send_failure_injection() {
        let mock = MockTransport::new("LOCAL");
        let (tx, _rx) = mpsc::channel(8);
        mock.open(tx).await.unwrap();
        mock.fail_sends_at([1]);

        assert!(mock.broadcast(Bytes::from_static(b"0")).await.is_ok());
        assert!(mock.broadcast(Bytes::from_static(b"1")).await.is_err());
        assert!(mock.broadcast(Bytes::from_static(b"2")).await.is_ok());
        assert_eq!(mock.broadcasts().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_scripted_discovery() {
        let mock = MockTransport::new("LOCAL");
        let (tx, mut rx) = mpsc::channel(8);
        mock.open(tx).await.unwrap();
        mock.script_discovery(DiscoveryScript::Fail);
        mock.set_peers(vec![PeerNode::new("N1", "a")]);

        mock.start_discovery().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::DiscoveryFinished {
                success: false,
                peers: Vec::new()
            }
        );

        mock.start_discovery().await.unwrap();
        match rx.recv().await.unwrap() {
            TransportEvent::DiscoveryFinished { success, peers } => {
                assert!(success);
                assert_eq!(peers.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_closed_drops_injection() {
        let mock = MockTransport::new("LOCAL");
        assert!(!mock.inject_raw(Bytes::from_static(b"x"), None));
        assert!(mock.broadcast(Bytes::from_static(b"x")).await.is_err());
    }

    #[test]
    fn test_fixture_peers() {
        let fixture = TestFixture::with_peers(&["N1", "N2"]);
        assert_eq!(fixture.transport.state.lock().peers.len(), 2);
        assert!(fixture.config.validate().is_ok());
    }
}
