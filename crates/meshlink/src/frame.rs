//! Message fragmentation into transport frames
//!
//! A message is cut left to right into chunks of at most `max_part_len`
//! bytes. Chunks never split a UTF-8 character, so every frame payload is
//! valid text on its own. Only the final frame carries `is_last`, which is
//! how receivers learn the part count.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

use crate::config::{MAX_ID_LENGTH, MIN_ID_LENGTH};
use crate::error::{MeshError, Result};

/// Short alphanumeric identifier shared by all frames of one message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Validate and wrap an identifier
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid_len = (MIN_ID_LENGTH..=MAX_ID_LENGTH).contains(&id.len());
        if valid_len && id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Ok(Self(id))
        } else {
            Err(MeshError::InvalidMessageId(id))
        }
    }

    /// Wrap an id already known to be 3-5 alphanumerics
    pub(crate) fn from_generated(id: String) -> Self {
        debug_assert!(Self::new(id.as_str()).is_ok());
        Self(id)
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = MeshError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// One chunk of a message as carried by a single transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message this frame belongs to
    pub message_id: MessageId,
    /// Position of the chunk, starting at 0
    pub part_index: usize,
    /// Chunk text
    pub payload: String,
    /// Node that first sent the message
    pub origin_node_id: String,
    /// Set only on the final chunk
    pub is_last: bool,
}

/// Split a message into ordered frames
///
/// Fails with [`MeshError::MessageTooLarge`] before producing anything when
/// the message is longer than `max_total_len` bytes. The empty message
/// yields a single empty final frame.
pub fn split(
    message_id: &MessageId,
    origin_node_id: &str,
    message: &str,
    max_part_len: usize,
    max_total_len: usize,
) -> Result<Vec<Frame>> {
    if message.len() > max_total_len {
        return Err(MeshError::MessageTooLarge {
            size: message.len(),
            max: max_total_len,
        });
    }

    let chunks = chunk_text(message, max_part_len);
    let last = chunks.len() - 1;
    let frames: Vec<Frame> = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| Frame {
            message_id: message_id.clone(),
            part_index: index,
            payload: chunk.to_string(),
            origin_node_id: origin_node_id.to_string(),
            is_last: index == last,
        })
        .collect();

    trace!(
        message_id = %message_id,
        bytes = message.len(),
        frames = frames.len(),
        "Split message into frames"
    );
    Ok(frames)
}

/// Join an index-sorted, complete set of chunks back into the message
pub fn join<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    parts.into_iter().collect()
}

/// Cut text into chunks of at most `max_len` bytes on character boundaries
///
/// A single character wider than `max_len` still forms its own chunk, so
/// the loop always makes progress.
fn chunk_text(text: &str, max_len: usize) -> Vec<&str> {
    let mut chunks = Vec::with_capacity(text.len() / max_len.max(1) + 1);
    let mut rest = text;

    while !rest.is_empty() {
        let mut end = rest.len().min(max_len);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }

    if chunks.is_empty() {
        chunks.push("");
    }
    chunks
}
