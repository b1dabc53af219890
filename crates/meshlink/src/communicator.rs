//! Communicator - the application-facing facade
//!
//! The communicator owns a transport and the protocol state around it:
//!
//! - Outbound: split a message into frames, encode, and hand every frame to
//!   the transport (broadcast or unicast)
//! - Inbound: decode frames, reassemble them, queue completed messages for
//!   the application, and hand them to the flood relay
//! - Discovery: keep the peer directory fresh in the background
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Communicator                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  send/send_to ──► split ──► WireCodec ──► Transport           │
//! │                                              │ events         │
//! │                                              ▼                │
//! │  ┌──────────────┐   frames   ┌──────────────────┐             │
//! │  │ InboundQueue │◄───────────│   event pump     │             │
//! │  └──────────────┘            │ ReassemblyTable  │             │
//! │                              └──────┬───────┬───┘             │
//! │                       relay jobs    │       │ outcomes        │
//! │                    ┌────────────────▼┐   ┌──▼──────────────┐  │
//! │                    │ ForwardingRelay │   │DiscoveryManager │  │
//! │                    │   SeenCache     │   │ PeerDirectory   │  │
//! │                    └─────────────────┘   └─────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use meshlink::{Communicator, MeshConfig};
//! use std::time::Duration;
//!
//! let comm = Communicator::new(transport, MeshConfig::default())?;
//! comm.connect().await?;
//!
//! comm.send("hello mesh").await?;
//! if let Some(msg) = comm.inbound().pop(Duration::from_secs(5)).await {
//!     println!("{} says {}", msg.origin_node_id, msg.message);
//! }
//!
//! comm.close().await?;
//! ```

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{SeenCache, SeenReason};
use crate::codec::{codec_for, WireCodec};
use crate::config::MeshConfig;
use crate::discovery::{DiscoveryManager, DiscoveryOutcome, DiscoveryState};
use crate::error::{MeshError, Result};
use crate::frame::{self, MessageId};
use crate::id::IdGenerator;
use crate::inbound::{self, InboundMessage, InboundQueue, InboundSender};
use crate::peers::{PeerDirectory, PeerNode};
use crate::reassembly::ReassemblyTable;
use crate::relay::{ForwardingRelay, RelayJob};
use crate::transport::{ConnectionState, Transport, TransportEvent};

/// Fresh ids drawn before accepting one this node recently used
const ID_REDRAW_ATTEMPTS: usize = 4;

/// Discovery outcomes buffered between the event pump and the discovery loop
const OUTCOME_BUFFER: usize = 4;

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Identifier given to the message
    pub message_id: MessageId,
    /// Frames handed to the transport
    pub frames: usize,
}

/// Communicator statistics
#[derive(Debug, Clone, Default)]
pub struct CommunicatorStats {
    /// Messages sent by this node
    pub messages_sent: u64,
    /// Frames handed to the transport by sends
    pub frames_sent: u64,
    /// Frames the transport refused during sends
    pub frame_send_failures: u64,
    /// Frames received from the transport
    pub frames_received: u64,
    /// Frames that could not be decoded
    pub malformed_frames: u64,
    /// Messages reassembled and delivered
    pub messages_completed: u64,
    /// Completed messages originated by this node and not delivered
    pub own_echoes: u64,
    /// Messages relayed to other peers
    pub messages_relayed: u64,
    /// Relays suppressed as already seen
    pub relay_suppressed: u64,
    /// Relay jobs dropped because the relay queue was full
    pub relay_jobs_dropped: u64,
    /// Inbound messages displaced before the consumer read them
    pub inbound_dropped: u64,
    /// Incomplete messages evicted for age
    pub stale_evicted: u64,
}

/// State shared with the background tasks
struct Core<T: Transport> {
    transport: Arc<T>,
    config: MeshConfig,
    codec: Arc<dyn WireCodec>,
    ids: IdGenerator,
    reassembly: ReassemblyTable,
    peers: Arc<PeerDirectory>,
    discovery: Arc<DiscoveryManager>,
    relay: Arc<ForwardingRelay>,
    seen: SeenCache,
    inbound_tx: InboundSender,
    inbound: InboundQueue,
    stats: Mutex<CommunicatorStats>,
}

/// Background tasks of one connected session
struct Session {
    closed_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// Mesh messaging over a transport
pub struct Communicator<T: Transport + 'static> {
    core: Arc<Core<T>>,
    session: tokio::sync::Mutex<Option<Session>>,
    state: RwLock<ConnectionState>,
}

impl<T: Transport + 'static> Communicator<T> {
    /// Create a communicator; nothing is opened until [`connect`](Self::connect)
    pub fn new(transport: T, config: MeshConfig) -> Result<Self> {
        config.validate()?;

        let codec = codec_for(config.framing.wire_format);
        let ids = IdGenerator::new(config.framing.id_length)?;
        let peers = Arc::new(PeerDirectory::new());
        let seen = SeenCache::from_config(&config.relay);
        let (inbound_tx, inbound) = inbound::channel(config.inbound.capacity);

        let core = Core {
            transport: Arc::new(transport),
            codec: Arc::clone(&codec),
            ids,
            reassembly: ReassemblyTable::new(&config.reassembly, config.framing.max_total_len),
            discovery: Arc::new(DiscoveryManager::new(
                config.discovery.clone(),
                Arc::clone(&peers),
            )),
            relay: Arc::new(ForwardingRelay::new(
                seen.clone(),
                codec,
                config.framing.max_part_len,
            )),
            peers,
            seen,
            inbound_tx,
            inbound,
            stats: Mutex::new(CommunicatorStats::default()),
            config,
        };

        Ok(Self {
            core: Arc::new(core),
            session: tokio::sync::Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
        })
    }

    /// Open the transport and start the background tasks
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(MeshError::AlreadyConnected);
        }

        let transport = &self.core.transport;
        *self.state.write() = ConnectionState::Connecting;
        info!(transport = transport.name(), "Connecting");

        let (event_tx, event_rx) = mpsc::channel(self.core.config.inbound.event_buffer);
        if let Err(e) = transport.open(event_tx).await {
            *self.state.write() = ConnectionState::Disconnected;
            warn!(transport = transport.name(), error = %e, "Failed to open transport");
            return Err(MeshError::ConnectionError {
                transport: transport.name().to_string(),
                reason: e.to_string(),
            });
        }

        let (closed_tx, closed_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_BUFFER);
        let mut tasks = Vec::with_capacity(3);

        let relay_tx = if self.core.config.relay.enabled {
            let (relay_tx, relay_rx) = mpsc::channel(self.core.config.relay.queue_size);
            let worker = Arc::clone(&self.core.relay).run(
                Arc::clone(transport),
                Arc::clone(&self.core.peers),
                relay_rx,
                closed_rx.clone(),
            );
            tasks.push(("relay", tokio::spawn(worker)));
            Some(relay_tx)
        } else {
            None
        };

        let discovery = Arc::clone(&self.core.discovery).run(
            Arc::clone(transport),
            outcome_rx,
            closed_rx.clone(),
        );
        tasks.push(("discovery", tokio::spawn(discovery)));

        let pump = Arc::clone(&self.core).event_pump(event_rx, outcome_tx, relay_tx, closed_rx);
        tasks.push(("event pump", tokio::spawn(pump)));

        *session = Some(Session { closed_tx, tasks });
        *self.state.write() = ConnectionState::Connected;
        info!(
            transport = transport.name(),
            node = %transport.local_node_id(),
            relay = self.core.config.relay.enabled,
            "Connected"
        );
        Ok(())
    }

    /// Stop the background tasks and close the transport
    ///
    /// Closing a communicator that is not connected does nothing. A later
    /// [`connect`](Self::connect) starts a fresh session.
    pub async fn close(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(Session { closed_tx, tasks }) = session.take() else {
            return Ok(());
        };

        *self.state.write() = ConnectionState::Closing;
        // Receivers may already be gone if a task ended early
        let _ = closed_tx.send(true);

        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "Background task failed");
            }
        }

        let result = self.core.transport.close().await;
        *self.state.write() = ConnectionState::Disconnected;
        info!(transport = self.core.transport.name(), "Closed");
        result
    }

    /// Broadcast a message to every neighbour
    pub async fn send(&self, message: &str) -> Result<SendReceipt> {
        self.ensure_connected()?;
        self.check_size(message)?;
        self.send_frames(message, None).await
    }

    /// Send a message to one known peer
    pub async fn send_to(&self, peer_node_id: &str, message: &str) -> Result<SendReceipt> {
        self.ensure_connected()?;
        self.check_size(message)?;
        let peer = self
            .core
            .peers
            .find(peer_node_id)
            .ok_or_else(|| MeshError::PeerNotFound(peer_node_id.to_string()))?;
        self.send_frames(message, Some(&peer)).await
    }

    /// Node ids from the last successful discovery
    pub fn list_peers(&self) -> Vec<String> {
        self.core.peers.ids()
    }

    /// Force the next discovery cycle to start from an empty peer cache
    pub fn refresh(&self) {
        self.core.discovery.request_refresh();
    }

    /// Handle to the queue of completed inbound messages
    pub fn inbound(&self) -> InboundQueue {
        self.core.inbound.clone()
    }

    /// Check if a session is active
    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> CommunicatorStats {
        let mut stats = self.core.stats.lock().clone();
        let relay = self.core.relay.stats();
        stats.messages_relayed = relay.relayed;
        stats.relay_suppressed = relay.suppressed;
        stats.stale_evicted = self.core.reassembly.stats().stale_evicted;
        stats.inbound_dropped = self.core.inbound.dropped();
        stats
    }

    /// Snapshot of the discovery state
    pub fn discovery_state(&self) -> DiscoveryState {
        self.core.discovery.state()
    }

    /// Identifier of the local node
    pub fn local_node_id(&self) -> String {
        self.core.transport.local_node_id()
    }

    /// The active configuration
    pub fn config(&self) -> &MeshConfig {
        &self.core.config
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MeshError::NotConnected)
        }
    }

    fn check_size(&self, message: &str) -> Result<()> {
        let max = self.core.config.framing.max_total_len;
        if message.len() > max {
            return Err(MeshError::MessageTooLarge {
                size: message.len(),
                max,
            });
        }
        Ok(())
    }

    async fn send_frames(&self, message: &str, target: Option<&PeerNode>) -> Result<SendReceipt> {
        let core = &self.core;
        let framing = &core.config.framing;
        let message_id = core.next_message_id();
        let frames = frame::split(
            &message_id,
            &core.transport.local_node_id(),
            message,
            framing.max_part_len,
            framing.max_total_len,
        )?;

        // Echoes of this message must never be relayed or redelivered
        core.seen.mark_seen(&message_id, SeenReason::Sent);

        let mut failed = 0;
        for frame in &frames {
            let data = core.codec.encode(frame);
            let result = match target {
                Some(peer) => core.transport.unicast(peer, data).await,
                None => core.transport.broadcast(data).await,
            };
            match result {
                Ok(()) => trace!(
                    message_id = %message_id,
                    part_index = frame.part_index,
                    "Sent frame"
                ),
                Err(e) => {
                    warn!(
                        message_id = %message_id,
                        part_index = frame.part_index,
                        error = %e,
                        "Frame send failed"
                    );
                    failed += 1;
                }
            }
        }

        let attempted = frames.len();
        {
            let mut stats = core.stats.lock();
            stats.frames_sent += (attempted - failed) as u64;
            stats.frame_send_failures += failed as u64;
            if failed == 0 {
                stats.messages_sent += 1;
            }
        }

        if failed > 0 {
            return Err(MeshError::SendFailed {
                message_id: message_id.to_string(),
                failed,
                attempted,
            });
        }

        debug!(
            message_id = %message_id,
            frames = attempted,
            peer = target.map(|p| p.node_id.as_str()).unwrap_or("*"),
            "Sent message"
        );
        Ok(SendReceipt {
            message_id,
            frames: attempted,
        })
    }
}

impl<T: Transport + 'static> std::fmt::Debug for Communicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("transport", &self.core.transport.name())
            .field("state", &*self.state.read())
            .finish()
    }
}

impl<T: Transport> Core<T> {
    /// Draw an id, avoiding ones this node used recently
    fn next_message_id(&self) -> MessageId {
        let mut id = self.ids.generate();
        for _ in 1..ID_REDRAW_ATTEMPTS {
            if !self.seen.contains(&id) {
                break;
            }
            trace!(message_id = %id, "Redrawing recently used message id");
            id = self.ids.generate();
        }
        id
    }

    /// Route transport events until the session closes
    async fn event_pump(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        outcomes: mpsc::Sender<DiscoveryOutcome>,
        relay_jobs: Option<mpsc::Sender<RelayJob>>,
        mut closed: watch::Receiver<bool>,
    ) {
        let period = self.config.reassembly.stale_after;
        let mut housekeeping =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        debug!("Event pump started");

        loop {
            if *closed.borrow() {
                break;
            }

            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::FrameReceived { data, sender }) => {
                        self.handle_frame(data, sender, relay_jobs.as_ref());
                    }
                    Some(TransportEvent::DiscoveryFinished { success, peers }) => {
                        if outcomes.try_send(DiscoveryOutcome { success, peers }).is_err() {
                            warn!("Discovery outcome dropped, no cycle waiting");
                        }
                    }
                    None => {
                        debug!("Transport event channel closed");
                        break;
                    }
                },
                _ = housekeeping.tick() => self.housekeeping(),
                _ = closed.changed() => break,
            }
        }

        debug!("Event pump stopped");
    }

    fn handle_frame(&self, data: Bytes, sender: Option<String>, relay_jobs: Option<&mpsc::Sender<RelayJob>>) {
        self.stats.lock().frames_received += 1;

        let frame = match self.codec.decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(sender = ?sender, bytes = data.len(), error = %e, "Dropping malformed frame");
                self.stats.lock().malformed_frames += 1;
                return;
            }
        };

        trace!(
            message_id = %frame.message_id,
            part_index = frame.part_index,
            sender = ?sender,
            "Received frame"
        );

        let Some(completed) = self.reassembly.add_part(frame) else {
            return;
        };

        if completed.origin_node_id == self.transport.local_node_id() {
            debug!(message_id = %completed.message_id, "Ignoring echo of own message");
            self.stats.lock().own_echoes += 1;
            return;
        }

        self.stats.lock().messages_completed += 1;
        debug!(
            message_id = %completed.message_id,
            origin = %completed.origin_node_id,
            sender = ?sender,
            "Message received"
        );

        self.inbound_tx.push(InboundMessage {
            message_id: completed.message_id.clone(),
            origin_node_id: completed.origin_node_id.clone(),
            sender: sender.clone(),
            message: completed.text.clone(),
        });

        if let Some(jobs) = relay_jobs {
            match jobs.try_send(RelayJob {
                message: completed,
                sender,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    warn!(message_id = %job.message.message_id, "Relay queue full, dropping relay job");
                    self.stats.lock().relay_jobs_dropped += 1;
                }
                Err(TrySendError::Closed(_)) => debug!("Relay worker gone"),
            }
        }
    }

    fn housekeeping(&self) {
        let stale = self.reassembly.sweep();
        let expired = self.seen.expire_old_entries();
        trace!(
            stale,
            expired,
            pending = self.reassembly.pending_count(),
            seen = self.seen.len(),
            "Housekeeping"
        );
    }
}
