//! Transport abstraction
//!
//! A transport moves opaque frames between this node and its neighbours and
//! runs neighbour discovery. Everything it observes is reported through the
//! event channel handed to [`Transport::open`]; the transport never calls
//! back into the protocol layer.
//!
//! Implementations must not block in their receive path: events are
//! delivered with `try_send`, and a full channel drops the event.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::peers::PeerNode;

/// Something the transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived
    FrameReceived {
        /// Raw frame bytes
        data: Bytes,
        /// Immediate neighbour that sent it, when the transport knows
        sender: Option<String>,
    },
    /// A discovery run ended
    DiscoveryFinished {
        /// Whether the run completed normally
        success: bool,
        /// Peers found; meaningful only on success
        peers: Vec<PeerNode>,
    },
}

/// Link layer used by the communicator
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link and start delivering events
    async fn open(&self, events: mpsc::Sender<TransportEvent>) -> Result<()>;

    /// Close the link; no events are delivered afterwards
    async fn close(&self) -> Result<()>;

    /// Identifier of the local node
    fn local_node_id(&self) -> String;

    /// Send a frame to every neighbour
    async fn broadcast(&self, frame: Bytes) -> Result<()>;

    /// Send a frame to one neighbour
    async fn unicast(&self, peer: &PeerNode, frame: Bytes) -> Result<()>;

    /// Bound the duration of the next discovery run
    async fn set_discovery_timeout(&self, timeout: Duration) -> Result<()>;

    /// Start a discovery run; its outcome arrives as [`TransportEvent::DiscoveryFinished`]
    async fn start_discovery(&self) -> Result<()>;

    /// Forget every neighbour the transport has cached
    async fn clear_known_peers(&self) -> Result<()>;

    /// Transport name (for logging)
    fn name(&self) -> &str;
}

/// Connection state of a communicator session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// `connect` in progress
    Connecting,
    /// Session active
    Connected,
    /// `close` in progress
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}
