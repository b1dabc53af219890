//! Seen-message cache for flood suppression
//!
//! Flooding relays every completed message to every neighbour, so without a
//! memory a message would circle the mesh forever:
//!
//! 1. Node A sends to B and C
//! 2. B relays to C, C relays to B
//! 3. B and C relay each other's copies back again... and so on
//!
//! [`SeenCache`] records message ids that this node has already relayed (or
//! originated) and answers "seen before?" for incoming completions. Entries
//! expire after a TTL and the oldest are evicted once the capacity is
//! reached, so memory stays bounded on a long-running node.

use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::RelayConfig;
use crate::frame::MessageId;

/// Why an id entered the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenReason {
    /// This node originated the message
    Sent,
    /// This node relayed the message
    Relayed,
}

#[derive(Debug, Clone)]
struct SeenEntry {
    first_seen: Instant,
    hits: u32,
    reason: SeenReason,
}

impl SeenEntry {
    fn new(first_seen: Instant, reason: SeenReason) -> Self {
        Self {
            first_seen,
            hits: 1,
            reason,
        }
    }
}

/// What a lookup found, tallied once the cache lock is released
#[derive(Debug, Clone, Copy)]
enum Verdict {
    Seen,
    Expired,
    New { evicted: bool },
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct SeenStats {
    /// Total lookups
    pub total_checks: u64,
    /// Lookups that found a live entry
    pub duplicates_blocked: u64,
    /// Ids recorded for the first time
    pub new_messages: u64,
    /// Entries found expired
    pub ttl_expirations: u64,
    /// Entries pushed out by capacity
    pub lru_evictions: u64,
}

impl SeenStats {
    /// Fraction of lookups that were duplicates (0.0 to 1.0)
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.duplicates_blocked as f64 / self.total_checks as f64
        }
    }
}

/// LRU cache of message ids with TTL expiration
///
/// Clones share the same underlying entries.
#[derive(Debug)]
pub struct SeenCache {
    cache: Arc<RwLock<LruCache<MessageId, SeenEntry>>>,
    ttl: Duration,
    stats: Arc<RwLock<SeenStats>>,
}

impl SeenCache {
    /// Create with default capacity (1000) and TTL (5 minutes)
    pub fn new() -> Self {
        Self::from_config(&RelayConfig::default())
    }

    /// Create from relay configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_capacity_and_ttl(config.seen_capacity, config.seen_ttl)
    }

    /// Create with custom capacity and TTL
    pub fn with_capacity_and_ttl(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(cap))),
            ttl,
            stats: Arc::new(RwLock::new(SeenStats::default())),
        }
    }

    /// Check an id and record it if new
    ///
    /// Returns `true` when the id was already present and live. An expired
    /// entry counts as new and is refreshed.
    pub fn check_and_mark(&self, id: &MessageId, reason: SeenReason) -> bool {
        let now = Instant::now();
        let verdict = {
            let mut cache = self.cache.write();
            match cache.get_mut(id) {
                Some(entry) if now.duration_since(entry.first_seen) <= self.ttl => {
                    entry.hits += 1;
                    debug!(message_id = %id, hits = entry.hits, first = ?entry.reason, "Message already seen");
                    Verdict::Seen
                }
                Some(entry) => {
                    *entry = SeenEntry::new(now, reason);
                    trace!(message_id = %id, "Seen entry expired, recording afresh");
                    Verdict::Expired
                }
                None => {
                    let evicted = cache.push(id.clone(), SeenEntry::new(now, reason)).is_some();
                    trace!(message_id = %id, reason = ?reason, "Message recorded as seen");
                    Verdict::New { evicted }
                }
            }
        };

        let mut stats = self.stats.write();
        stats.total_checks += 1;
        match verdict {
            Verdict::Seen => stats.duplicates_blocked += 1,
            Verdict::Expired => {
                stats.ttl_expirations += 1;
                stats.new_messages += 1;
            }
            Verdict::New { evicted } => {
                stats.lru_evictions += u64::from(evicted);
                stats.new_messages += 1;
            }
        }
        matches!(verdict, Verdict::Seen)
    }

    /// Record an id without counting a lookup
    pub fn mark_seen(&self, id: &MessageId, reason: SeenReason) {
        let evicted = self
            .cache
            .write()
            .push(id.clone(), SeenEntry::new(Instant::now(), reason));
        if matches!(evicted, Some((ref old, _)) if old != id) {
            self.stats.write().lru_evictions += 1;
        }
    }

    /// Whether a live entry exists, without touching recency or stats
    pub fn contains(&self, id: &MessageId) -> bool {
        self.cache
            .read()
            .peek(id)
            .is_some_and(|entry| entry.first_seen.elapsed() <= self.ttl)
    }

    /// Remove entries older than the TTL, returning how many were removed
    pub fn expire_old_entries(&self) -> usize {
        let mut cache = self.cache.write();
        let expired: Vec<MessageId> = cache
            .iter()
            .filter(|(_, entry)| entry.first_seen.elapsed() > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            cache.pop(id);
        }

        if !expired.is_empty() {
            self.stats.write().ttl_expirations += expired.len() as u64;
            debug!(count = expired.len(), "Expired seen-message entries");
        }
        expired.len()
    }

    /// Number of entries, live or expired
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> SeenStats {
        self.stats.read().clone()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// Configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.cache.read().cap().get()
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SeenCache {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
            stats: Arc::clone(&self.stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MessageId {
        MessageId::new(s).unwrap()
    }

    #[test]
    fn test_first_check_is_new() {
        let cache = SeenCache::new();
        assert!(!cache.check_and_mark(&id("abc"), SeenReason::Relayed));
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.new_messages, 1);
        assert_eq!(stats.duplicates_blocked, 0);
    }

    #[test]
    fn test_repeat_check_is_duplicate() {
        let cache = SeenCache::new();
        let key = id("abc");

        assert!(!cache.check_and_mark(&key, SeenReason::Relayed));
        assert!(cache.check_and_mark(&key, SeenReason::Relayed));
        assert!(cache.check_and_mark(&key, SeenReason::Relayed));

        let stats = cache.stats();
        assert_eq!(stats.total_checks, 3);
        assert_eq!(stats.duplicates_blocked, 2);
        assert!((stats.duplicate_rate() - 2.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn test_sent_ids_suppress_relay() {
        let cache = SeenCache::new();
        cache.mark_seen(&id("Own01"), SeenReason::Sent);
        assert!(cache.contains(&id("Own01")));
        assert!(cache.check_and_mark(&id("Own01"), SeenReason::Relayed));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = SeenCache::with_capacity_and_ttl(3, Duration::from_secs(300));
        for key in ["aaa", "bbb", "ccc", "ddd"] {
            cache.check_and_mark(&id(key), SeenReason::Relayed);
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().lru_evictions, 1);
        assert!(!cache.contains(&id("aaa")));
        assert!(!cache.check_and_mark(&id("aaa"), SeenReason::Relayed));
    }

    #[test]
    fn test_ttl_expiration() {
        let cache = SeenCache::with_capacity_and_ttl(10, Duration::from_millis(50));
        let key = id("ttl");

        assert!(!cache.check_and_mark(&key, SeenReason::Relayed));
        assert!(cache.check_and_mark(&key, SeenReason::Relayed));

        std::thread::sleep(Duration::from_millis(60));

        assert!(!cache.contains(&key));
        assert!(!cache.check_and_mark(&key, SeenReason::Relayed));

        let stats = cache.stats();
        assert_eq!(stats.total_checks, 3);
        assert_eq!(stats.new_messages, 2);
        assert_eq!(stats.ttl_expirations, 1);
        assert_eq!(stats.duplicates_blocked, 1);
    }

    #[test]
    fn test_expire_old_entries_removes() {
        let cache = SeenCache::with_capacity_and_ttl(10, Duration::from_millis(20));
        cache.mark_seen(&id("old1"), SeenReason::Relayed);
        cache.mark_seen(&id("old2"), SeenReason::Sent);

        std::thread::sleep(Duration::from_millis(30));
        cache.mark_seen(&id("new1"), SeenReason::Relayed);

        assert_eq!(cache.expire_old_entries(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&id("new1")));
    }

    #[test]
    fn test_clone_shares_data() {
        let cache1 = SeenCache::new();
        cache1.check_and_mark(&id("shr"), SeenReason::Relayed);

        let cache2 = cache1.clone();
        assert!(cache2.check_and_mark(&id("shr"), SeenReason::Relayed));
        assert_eq!(cache1.len(), cache2.len());
    }

    #[test]
    fn test_from_config() {
        let config = RelayConfig {
            seen_capacity: 500,
            seen_ttl: Duration::from_secs(120),
            ..Default::default()
        };
        let cache = SeenCache::from_config(&config);

        assert_eq!(cache.capacity(), 500);
        assert_eq!(cache.ttl(), Duration::from_secs(120));
    }

    #[test]
    fn test_clear() {
        let cache = SeenCache::new();
        cache.mark_seen(&id("c1c"), SeenReason::Relayed);
        cache.clear();
        assert!(cache.is_empty());
    }
}
