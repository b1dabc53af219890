//! Reassembly of frames into complete messages
//!
//! Frames of one message may arrive in any order and more than once. The
//! table collects them per message id until the final frame has fixed the
//! part count and every index below it is present. Incomplete messages are
//! evicted once older than `stale_after`, and the table never holds more
//! than `max_pending` of them. Ids of completed messages are remembered for
//! `stale_after` as well, up to [`DELIVERED_PER_PENDING`] times `max_pending`
//! of them.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::config::ReassemblyConfig;
use crate::frame::{self, Frame, MessageId};

/// A fully reassembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage {
    /// Message identifier
    pub message_id: MessageId,
    /// Node that first sent the message
    pub origin_node_id: String,
    /// Reassembled text
    pub text: String,
}

/// Reassembly counters
#[derive(Debug, Clone, Default)]
pub struct ReassemblyStats {
    /// Frames stored
    pub frames_accepted: u64,
    /// Frames already stored, or belonging to a delivered message
    pub duplicates: u64,
    /// Frames rejected as inconsistent with their message
    pub rejected: u64,
    /// Messages completed
    pub completed: u64,
    /// Incomplete messages dropped for age
    pub stale_evicted: u64,
    /// Incomplete messages dropped to respect `max_pending`
    pub overflow_evicted: u64,
}

#[derive(Debug)]
struct PendingMessage {
    parts: BTreeMap<usize, String>,
    total_parts: Option<usize>,
    origin_node_id: String,
    first_seen_at: Instant,
}

impl PendingMessage {
    fn is_complete(&self) -> bool {
        // Indices at or beyond total_parts are never stored
        self.total_parts == Some(self.parts.len())
    }
}

/// Delivered ids remembered per allowed incomplete message
pub const DELIVERED_PER_PENDING: usize = 4;

#[derive(Debug)]
struct TableState {
    pending: HashMap<MessageId, PendingMessage>,
    /// Recently delivered ids and when they completed, oldest first
    delivered: LruCache<MessageId, Instant>,
    stats: ReassemblyStats,
}

/// Thread-safe reassembly table
#[derive(Debug)]
pub struct ReassemblyTable {
    state: Mutex<TableState>,
    stale_after: Duration,
    max_pending: usize,
    max_parts: usize,
}

impl ReassemblyTable {
    /// Create from configuration
    ///
    /// `max_total_len` bounds the part count: every non-final chunk holds at
    /// least one byte, so no sender can produce more parts than that.
    pub fn new(config: &ReassemblyConfig, max_total_len: usize) -> Self {
        Self::with_limits(config.stale_after, config.max_pending, max_total_len.max(1))
    }

    /// Create with explicit limits
    pub fn with_limits(stale_after: Duration, max_pending: usize, max_parts: usize) -> Self {
        let max_pending = max_pending.max(1);
        let remembered = NonZeroUsize::new(max_pending.saturating_mul(DELIVERED_PER_PENDING))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(TableState {
                pending: HashMap::new(),
                delivered: LruCache::new(remembered),
                stats: ReassemblyStats::default(),
            }),
            stale_after,
            max_pending,
            max_parts: max_parts.max(1),
        }
    }

    /// Store one frame
    ///
    /// Returns the completed message exactly once, from the call that
    /// supplies the last missing part.
    pub fn add_part(&self, frame: Frame) -> Option<CompletedMessage> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.evict_stale(state, now);

        if frame.part_index >= self.max_parts {
            warn!(
                message_id = %frame.message_id,
                part_index = frame.part_index,
                max_parts = self.max_parts,
                "Ignoring frame with out-of-range index"
            );
            state.stats.rejected += 1;
            return None;
        }

        if state.delivered.contains(&frame.message_id) {
            trace!(
                message_id = %frame.message_id,
                part_index = frame.part_index,
                "Frame of already delivered message"
            );
            state.stats.duplicates += 1;
            return None;
        }

        if !state.pending.contains_key(&frame.message_id) && state.pending.len() >= self.max_pending {
            Self::evict_oldest(state);
        }

        let Frame {
            message_id,
            part_index,
            payload,
            origin_node_id,
            is_last,
        } = frame;

        let entry = state
            .pending
            .entry(message_id.clone())
            .or_insert_with(|| PendingMessage {
                parts: BTreeMap::new(),
                total_parts: None,
                origin_node_id,
                first_seen_at: now,
            });

        if let Some(total) = entry.total_parts {
            let conflicting_last = is_last && part_index + 1 != total;
            if conflicting_last || part_index >= total {
                warn!(
                    message_id = %message_id,
                    part_index,
                    total_parts = total,
                    "Ignoring frame inconsistent with known part count"
                );
                state.stats.rejected += 1;
                return None;
            }
        }

        let duplicate = entry.parts.contains_key(&part_index);
        if !duplicate {
            entry.parts.insert(part_index, payload);
        }

        if is_last {
            let total = part_index + 1;
            entry.total_parts = Some(total);
            let beyond = entry.parts.split_off(&total);
            if !beyond.is_empty() {
                warn!(
                    message_id = %message_id,
                    dropped = beyond.len(),
                    "Dropped parts beyond the final index"
                );
            }
        }

        trace!(
            message_id = %message_id,
            part_index,
            received = entry.parts.len(),
            total_parts = ?entry.total_parts,
            "Stored frame"
        );

        let complete = entry.is_complete();
        if duplicate {
            state.stats.duplicates += 1;
        } else {
            state.stats.frames_accepted += 1;
        }

        if !complete {
            return None;
        }

        let pending = state.pending.remove(&message_id)?;
        let text = frame::join(pending.parts.values().map(String::as_str));
        state.delivered.push(message_id.clone(), now);
        state.stats.completed += 1;

        debug!(
            message_id = %message_id,
            origin = %pending.origin_node_id,
            bytes = text.len(),
            parts = pending.total_parts.unwrap_or_default(),
            "Reassembled message"
        );

        Some(CompletedMessage {
            message_id,
            origin_node_id: pending.origin_node_id,
            text,
        })
    }

    /// Evict stale entries now, returning how many incomplete messages were dropped
    pub fn sweep(&self) -> usize {
        let mut state = self.state.lock();
        self.evict_stale(&mut state, Instant::now())
    }

    /// Number of incomplete messages held
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ReassemblyStats {
        self.state.lock().stats.clone()
    }

    fn evict_stale(&self, state: &mut TableState, now: Instant) -> usize {
        let stale_after = self.stale_after;
        let before = state.pending.len();

        state.pending.retain(|id, entry| {
            let keep = now.duration_since(entry.first_seen_at) <= stale_after;
            if !keep {
                warn!(
                    message_id = %id,
                    received = entry.parts.len(),
                    total_parts = ?entry.total_parts,
                    "Expiring incomplete message"
                );
            }
            keep
        });
        // `contains` leaves recency alone, so LRU order is completion order
        while state
            .delivered
            .peek_lru()
            .is_some_and(|(_, completed_at)| now.duration_since(*completed_at) > stale_after)
        {
            state.delivered.pop_lru();
        }

        let evicted = before - state.pending.len();
        state.stats.stale_evicted += evicted as u64;
        evicted
    }

    fn evict_oldest(state: &mut TableState) {
        let oldest = state
            .pending
            .iter()
            .min_by_key(|(_, entry)| entry.first_seen_at)
            .map(|(id, _)| id.clone());

        if let Some(id) = oldest {
            state.pending.remove(&id);
            state.stats.overflow_evicted += 1;
            warn!(message_id = %id, "Reassembly table full, dropped oldest incomplete message");
        }
    }
}

impl Default for ReassemblyTable {
    fn default() -> Self {
        Self::new(&ReassemblyConfig::default(), crate::config::DEFAULT_MAX_TOTAL_LEN)
    }
}
