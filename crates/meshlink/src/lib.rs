//! Mesh messaging over small-frame radio links
//!
//! This crate carries text messages across a mesh of radio nodes whose link
//! layer only moves short frames. It splits messages into frames, puts them
//! back together on the far side, keeps track of neighbours, and floods
//! messages onward so they reach nodes beyond direct range.
//!
//! # Architecture
//!
//! The stack has four layers:
//!
//! 1. **Transport** - a [`Transport`] implementation moves raw frames and
//!    runs neighbour discovery
//! 2. **Framing** - [`frame::split`] and a [`WireCodec`] turn messages into
//!    frames and back
//! 3. **Mesh services** - [`ReassemblyTable`], [`DiscoveryManager`] and
//!    [`ForwardingRelay`]
//! 4. **Facade** - [`Communicator`] ties them together for the application
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use meshlink::{Communicator, MeshConfigBuilder};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> meshlink::Result<()> {
//!     let config = MeshConfigBuilder::new()
//!         .max_part_len(50)
//!         .discovery_interval(Duration::from_secs(30))
//!         .build();
//!
//!     let comm = Communicator::new(my_radio_transport(), config)?;
//!     comm.connect().await?;
//!
//!     comm.send("hello mesh").await?;
//!     for peer in comm.list_peers() {
//!         comm.send_to(&peer, "hi neighbour").await?;
//!     }
//!
//!     let inbound = comm.inbound();
//!     while let Some(msg) = inbound.pop(Duration::from_secs(10)).await {
//!         println!("[{}] {}", msg.origin_node_id, msg.message);
//!     }
//!
//!     comm.close().await
//! }
//! ```
//!
//! # Message Flow
//!
//! ## Outbound
//!
//! 1. `send` / `send_to` draws a fresh [`MessageId`]
//! 2. The message is split into chunks of at most `max_part_len` bytes
//! 3. Each frame is encoded and handed to the transport
//!
//! ## Inbound
//!
//! 1. The transport reports a frame on its event channel
//! 2. The event pump decodes it and stores it in the reassembly table
//! 3. A completed message is queued on the [`InboundQueue`]
//! 4. The relay re-sends it to every other peer unless its id was seen
//!
//! # Frame Format
//!
//! The default delimited encoding joins five fields with `0x1F`:
//!
//! ```text
//! message_id 0x1F part_index 0x1F chunk 0x1F origin_node_id 0x1F is_last
//! ```
//!
//! Messages are limited to **400 bytes** split into **50-byte** chunks by
//! default.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core types
pub mod config;
pub mod error;
pub mod frame;
pub mod codec;
pub mod id;

// Mesh services
pub mod cache;
pub mod reassembly;
pub mod peers;
pub mod discovery;
pub mod relay;

// Transport and facade
pub mod transport;
pub mod inbound;
pub mod communicator;

// Testing utilities
pub mod test_utils;

pub use config::{
    DiscoveryConfig, FramingConfig, InboundConfig, MeshConfig, MeshConfigBuilder, ReassemblyConfig,
    RelayConfig, WireFormat,
};
pub use error::{MeshError, Result};
pub use frame::{Frame, MessageId};
pub use codec::{codec_for, DelimitedCodec, JsonCodec, WireCodec};
pub use id::{collision_probability, IdGenerator};

pub use cache::{SeenCache, SeenReason, SeenStats};
pub use reassembly::{CompletedMessage, ReassemblyStats, ReassemblyTable, DELIVERED_PER_PENDING};
pub use peers::{PeerDirectory, PeerNode};
pub use discovery::{DiscoveryManager, DiscoveryOutcome, DiscoveryPhase, DiscoveryState};
pub use relay::{ForwardingRelay, RelayJob, RelayOutcome, RelayStats};

pub use transport::{ConnectionState, Transport, TransportEvent};
pub use inbound::{InboundMessage, InboundQueue};
pub use communicator::{Communicator, CommunicatorStats, SendReceipt};

pub use test_utils::{DiscoveryScript, MockTransport, TestFixture};

// Protocol constants re-exports
pub use codec::{ESCAPE, SEPARATOR};
pub use config::{
    DEFAULT_DISCOVERY_INTERVAL, DEFAULT_ID_LENGTH, DEFAULT_MAX_PART_LEN, DEFAULT_MAX_TOTAL_LEN,
    DEFAULT_REFRESH_EVERY, DEFAULT_STALE_AFTER, MAX_ID_LENGTH, MIN_ID_LENGTH,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
