//! Configuration types for the mesh communicator
//!
//! Every section deserializes with per-field defaults, so a partial
//! document (or none at all) yields a working configuration. Durations are
//! written in humantime form, e.g. `"60s"` or `"5m"`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MeshError, Result};

/// Default maximum chunk length per frame, in bytes
pub const DEFAULT_MAX_PART_LEN: usize = 50;

/// Default maximum total message length, in bytes
pub const DEFAULT_MAX_TOTAL_LEN: usize = 400;

/// Smallest chunk length that still fits any UTF-8 character
pub const MIN_PART_LEN: usize = 4;

/// Default message id length
pub const DEFAULT_ID_LENGTH: usize = 5;

/// Shortest allowed message id
pub const MIN_ID_LENGTH: usize = 3;

/// Longest allowed message id
pub const MAX_ID_LENGTH: usize = 5;

/// Default age after which an incomplete message is dropped
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Default pause between discovery cycles
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

/// Default period after which discovery forgets known peers and re-enumerates
pub const DEFAULT_REFRESH_EVERY: Duration = Duration::from_secs(32);

/// Main configuration for the communicator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Fragmentation and wire encoding
    #[serde(default)]
    pub framing: FramingConfig,

    /// Reassembly table limits
    #[serde(default)]
    pub reassembly: ReassemblyConfig,

    /// Peer discovery cadence
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Flood relay behaviour
    #[serde(default)]
    pub relay: RelayConfig,

    /// Consumer queue
    #[serde(default)]
    pub inbound: InboundConfig,
}

impl MeshConfig {
    /// Check the configuration for values the protocol cannot work with
    pub fn validate(&self) -> Result<()> {
        let framing = &self.framing;
        if framing.max_part_len < MIN_PART_LEN {
            return Err(MeshError::InvalidConfig(format!(
                "max_part_len must be at least {} bytes, got {}",
                MIN_PART_LEN, framing.max_part_len
            )));
        }
        if framing.max_part_len > framing.max_total_len {
            return Err(MeshError::InvalidConfig(format!(
                "max_part_len ({}) exceeds max_total_len ({})",
                framing.max_part_len, framing.max_total_len
            )));
        }
        if !(MIN_ID_LENGTH..=MAX_ID_LENGTH).contains(&framing.id_length) {
            return Err(MeshError::InvalidConfig(format!(
                "id_length must be between {} and {}, got {}",
                MIN_ID_LENGTH, MAX_ID_LENGTH, framing.id_length
            )));
        }
        if self.reassembly.max_pending == 0 {
            return Err(MeshError::InvalidConfig("max_pending must be non-zero".into()));
        }
        if self.reassembly.stale_after.is_zero() {
            return Err(MeshError::InvalidConfig("stale_after must be non-zero".into()));
        }
        if self.discovery.interval.is_zero() {
            return Err(MeshError::InvalidConfig(
                "discovery interval must be non-zero".into(),
            ));
        }
        if self.discovery.initial_timeout.is_zero() || self.discovery.steady_timeout.is_zero() {
            return Err(MeshError::InvalidConfig(
                "discovery timeouts must be non-zero".into(),
            ));
        }
        if self.relay.seen_capacity == 0 || self.relay.queue_size == 0 {
            return Err(MeshError::InvalidConfig(
                "relay seen_capacity and queue_size must be non-zero".into(),
            ));
        }
        if self.inbound.capacity == 0 || self.inbound.event_buffer == 0 {
            return Err(MeshError::InvalidConfig(
                "inbound capacity and event_buffer must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Wire encoding used for frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Five fields separated by the 0x1F unit separator
    #[default]
    Delimited,
    /// JSON object with tagged fields
    Json,
}

/// Fragmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    /// Maximum chunk length per frame in bytes
    #[serde(default = "default_max_part_len")]
    pub max_part_len: usize,

    /// Maximum total message length in bytes; longer sends are rejected
    #[serde(default = "default_max_total_len")]
    pub max_total_len: usize,

    /// Length of generated message ids (3-5)
    #[serde(default = "default_id_length")]
    pub id_length: usize,

    /// Frame encoding strategy
    #[serde(default)]
    pub wire_format: WireFormat,
}

fn default_max_part_len() -> usize {
    DEFAULT_MAX_PART_LEN
}

fn default_max_total_len() -> usize {
    DEFAULT_MAX_TOTAL_LEN
}

fn default_id_length() -> usize {
    DEFAULT_ID_LENGTH
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_part_len: DEFAULT_MAX_PART_LEN,
            max_total_len: DEFAULT_MAX_TOTAL_LEN,
            id_length: DEFAULT_ID_LENGTH,
            wire_format: WireFormat::Delimited,
        }
    }
}

/// Reassembly table limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassemblyConfig {
    /// Age after which an incomplete message is evicted
    #[serde(with = "humantime_serde", default = "default_stale_after")]
    pub stale_after: Duration,

    /// Maximum number of messages reassembled concurrently
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_stale_after() -> Duration {
    DEFAULT_STALE_AFTER
}

fn default_max_pending() -> usize {
    64
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            max_pending: 64,
        }
    }
}

/// Discovery cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Pause between the end of one cycle and the start of the next
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// Cycle timeout until the first successful cycle
    #[serde(with = "humantime_serde", default = "default_initial_timeout")]
    pub initial_timeout: Duration,

    /// Cycle timeout once a cycle has succeeded
    #[serde(with = "humantime_serde", default = "default_steady_timeout")]
    pub steady_timeout: Duration,

    /// Extra wait for the transport's outcome beyond the cycle timeout
    #[serde(with = "humantime_serde", default = "default_grace")]
    pub grace: Duration,

    /// Period of forced re-enumeration: a cycle starting this long after the
    /// last clear drops the transport's known peers first. Zero disables it.
    #[serde(with = "humantime_serde", default = "default_refresh_every")]
    pub refresh_every: Duration,
}

fn default_interval() -> Duration {
    DEFAULT_DISCOVERY_INTERVAL
}

fn default_initial_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_steady_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_refresh_every() -> Duration {
    DEFAULT_REFRESH_EVERY
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_DISCOVERY_INTERVAL,
            initial_timeout: Duration::from_secs(10),
            steady_timeout: Duration::from_secs(5),
            grace: Duration::from_secs(2),
            refresh_every: DEFAULT_REFRESH_EVERY,
        }
    }
}

/// Flood relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Re-broadcast completed inbound messages to other peers
    #[serde(default = "default_relay_enabled")]
    pub enabled: bool,

    /// Number of relayed ids remembered for loop suppression
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,

    /// How long a relayed id suppresses re-flooding
    #[serde(with = "humantime_serde", default = "default_seen_ttl")]
    pub seen_ttl: Duration,

    /// Pending relay jobs; jobs beyond this are dropped
    #[serde(default = "default_relay_queue_size")]
    pub queue_size: usize,
}

fn default_relay_enabled() -> bool {
    true
}

fn default_seen_capacity() -> usize {
    1000
}

fn default_seen_ttl() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_relay_queue_size() -> usize {
    32
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seen_capacity: 1000,
            seen_ttl: Duration::from_secs(300),
            queue_size: 32,
        }
    }
}

/// Inbound delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    /// Completed messages buffered for the consumer; oldest are dropped beyond this
    #[serde(default = "default_inbound_capacity")]
    pub capacity: usize,

    /// Raw transport events buffered between the transport and the event pump
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_inbound_capacity() -> usize {
    128
}

fn default_event_buffer() -> usize {
    256
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            event_buffer: 256,
        }
    }
}

/// Builder for MeshConfig
#[derive(Debug, Default)]
pub struct MeshConfigBuilder {
    config: MeshConfig,
}

impl MeshConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum chunk length per frame
    pub fn max_part_len(mut self, len: usize) -> Self {
        self.config.framing.max_part_len = len;
        self
    }

    /// Set the maximum total message length
    pub fn max_total_len(mut self, len: usize) -> Self {
        self.config.framing.max_total_len = len;
        self
    }

    /// Set the generated message id length
    pub fn id_length(mut self, len: usize) -> Self {
        self.config.framing.id_length = len;
        self
    }

    /// Select the frame encoding
    pub fn wire_format(mut self, format: WireFormat) -> Self {
        self.config.framing.wire_format = format;
        self
    }

    /// Set the staleness TTL for incomplete messages
    pub fn stale_after(mut self, ttl: Duration) -> Self {
        self.config.reassembly.stale_after = ttl;
        self
    }

    /// Set the maximum number of concurrently reassembled messages
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.reassembly.max_pending = max;
        self
    }

    /// Set the pause between discovery cycles
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery.interval = interval;
        self
    }

    /// Set the initial and steady-state discovery timeouts
    pub fn discovery_timeouts(mut self, initial: Duration, steady: Duration) -> Self {
        self.config.discovery.initial_timeout = initial;
        self.config.discovery.steady_timeout = steady;
        self
    }

    /// Set the forced re-enumeration period; zero disables it
    pub fn refresh_every(mut self, period: Duration) -> Self {
        self.config.discovery.refresh_every = period;
        self
    }

    /// Enable or disable flood relay
    pub fn relay(mut self, enabled: bool) -> Self {
        self.config.relay.enabled = enabled;
        self
    }

    /// Set the TTL of relayed ids
    pub fn seen_ttl(mut self, ttl: Duration) -> Self {
        self.config.relay.seen_ttl = ttl;
        self
    }

    /// Set the consumer queue capacity
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound.capacity = capacity;
        self
    }

    /// Build the configuration
    pub fn build(self) -> MeshConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert_eq!(config.framing.max_part_len, 50);
        assert_eq!(config.framing.max_total_len, 400);
        assert_eq!(config.reassembly.stale_after, Duration::from_secs(60));
        assert_eq!(config.framing.wire_format, WireFormat::Delimited);
        assert!(config.relay.enabled);
        assert_eq!(config.discovery.refresh_every, Duration::from_secs(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MeshConfigBuilder::new()
            .max_part_len(10)
            .max_total_len(100)
            .id_length(3)
            .relay(false)
            .build();

        assert_eq!(config.framing.max_part_len, 10);
        assert_eq!(config.framing.id_length, 3);
        assert!(!config.relay.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_part_larger_than_total() {
        let config = MeshConfigBuilder::new()
            .max_part_len(500)
            .max_total_len(400)
            .build();
        assert!(matches!(config.validate(), Err(MeshError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_tiny_parts_and_bad_ids() {
        let config = MeshConfigBuilder::new().max_part_len(2).build();
        assert!(config.validate().is_err());

        let config = MeshConfigBuilder::new().id_length(6).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "framing": { "max_part_len": 20, "wire_format": "json" },
            "reassembly": { "stale_after": "90s" },
            "relay": { "seen_ttl": "2m" },
            "discovery": { "refresh_every": "0s" }
        }"#;
        let config: MeshConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.framing.max_part_len, 20);
        assert_eq!(config.framing.max_total_len, DEFAULT_MAX_TOTAL_LEN);
        assert_eq!(config.framing.wire_format, WireFormat::Json);
        assert_eq!(config.reassembly.stale_after, Duration::from_secs(90));
        assert_eq!(config.reassembly.max_pending, 64);
        assert_eq!(config.relay.seen_ttl, Duration::from_secs(120));
        assert_eq!(config.discovery.interval, DEFAULT_DISCOVERY_INTERVAL);
        assert!(config.discovery.refresh_every.is_zero());
    }
}
