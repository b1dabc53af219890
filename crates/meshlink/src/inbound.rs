//! Consumer queue for completed messages
//!
//! A bounded ring between the event pump and the application. Pushing never
//! blocks: once exactly `capacity` records are waiting, each new one
//! displaces the oldest. Displaced records are counted.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::frame::MessageId;

/// A message delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message identifier
    pub message_id: MessageId,
    /// Node that first sent the message
    pub origin_node_id: String,
    /// Neighbour the completing frame came from, when known
    pub sender: Option<String>,
    /// Message text
    pub message: String,
}

#[derive(Debug)]
struct Ring {
    messages: VecDeque<InboundMessage>,
    dropped: u64,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    ring: Mutex<Ring>,
    ready: Notify,
}

/// Create a connected producer/consumer pair holding at most `capacity` messages
pub(crate) fn channel(capacity: usize) -> (InboundSender, InboundQueue) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        capacity,
        ring: Mutex::new(Ring {
            messages: VecDeque::with_capacity(capacity),
            dropped: 0,
        }),
        ready: Notify::new(),
    });
    (
        InboundSender {
            shared: Arc::clone(&shared),
        },
        InboundQueue { shared },
    )
}

/// Producer side, held by the event pump
#[derive(Debug, Clone)]
pub(crate) struct InboundSender {
    shared: Arc<Shared>,
}

impl InboundSender {
    /// Enqueue a message, displacing the oldest when full
    pub(crate) fn push(&self, message: InboundMessage) {
        trace!(message_id = %message.message_id, "Queued inbound message");
        {
            let mut ring = self.shared.ring.lock();
            if ring.messages.len() >= self.shared.capacity {
                if let Some(displaced) = ring.messages.pop_front() {
                    ring.dropped += 1;
                    warn!(
                        message_id = %displaced.message_id,
                        capacity = self.shared.capacity,
                        "Inbound queue full, dropped oldest message"
                    );
                }
            }
            ring.messages.push_back(message);
        }
        self.shared.ready.notify_one();
    }
}

/// Consumer handle
///
/// Clones share one underlying ring, so each message is popped once.
#[derive(Debug, Clone)]
pub struct InboundQueue {
    shared: Arc<Shared>,
}

impl InboundQueue {
    /// Wait up to `timeout` for the next message
    ///
    /// Returns `None` when nothing arrived in time.
    pub async fn pop(&self, timeout: Duration) -> Option<InboundMessage> {
        tokio::time::timeout(timeout, async {
            loop {
                // Register interest before checking so a push in between is not missed
                let ready = self.shared.ready.notified();
                if let Some(message) = self.try_pop() {
                    return message;
                }
                ready.await;
            }
        })
        .await
        .ok()
    }

    /// Take the next message if one is waiting
    pub fn try_pop(&self) -> Option<InboundMessage> {
        self.shared.ring.lock().messages.pop_front()
    }

    /// Messages waiting
    pub fn len(&self) -> usize {
        self.shared.ring.lock().messages.len()
    }

    /// Check if no message is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of messages held before the oldest is displaced
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Messages displaced before the consumer reached them
    pub fn dropped(&self) -> u64 {
        self.shared.ring.lock().dropped
    }
}
