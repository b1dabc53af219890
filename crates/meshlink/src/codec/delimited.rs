//! Canonical delimited frame encoding
//!
//! Layout, fields joined by [`SEPARATOR`]:
//!
//! ```text
//! message_id | part_index | chunk | origin_node_id | is_last
//!   "aB3x9"  |    "0"     | "..." |   "NODE-7"     | "0"/"1"
//! ```
//!
//! Inside `chunk` and `origin_node_id` a literal separator or [`ESCAPE`]
//! is prefixed with [`ESCAPE`].

use bytes::Bytes;

use super::WireCodec;
use crate::config::WireFormat;
use crate::error::{MeshError, Result};
use crate::frame::{Frame, MessageId};

/// Field separator (ASCII unit separator)
pub const SEPARATOR: char = '\u{1F}';

/// Escape prefix for separators and escapes inside string fields
pub const ESCAPE: char = '\\';

/// Number of fields in a frame
const FIELD_COUNT: usize = 5;

/// Fixed-field codec using the unit separator
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedCodec;

impl DelimitedCodec {
    fn escape_into(out: &mut String, field: &str) {
        for ch in field.chars() {
            if ch == SEPARATOR || ch == ESCAPE {
                out.push(ESCAPE);
            }
            out.push(ch);
        }
    }

    /// Split on unescaped separators, removing escape prefixes
    fn split_fields(text: &str) -> Result<Vec<String>> {
        let mut fields = Vec::with_capacity(FIELD_COUNT);
        let mut current = String::new();
        let mut escaped = false;

        for ch in text.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
            } else if ch == ESCAPE {
                escaped = true;
            } else if ch == SEPARATOR {
                fields.push(std::mem::take(&mut current));
            } else {
                current.push(ch);
            }
        }

        if escaped {
            return Err(MeshError::MalformedFrame("dangling escape".to_string()));
        }
        fields.push(current);
        Ok(fields)
    }
}

impl WireCodec for DelimitedCodec {
    fn encode(&self, frame: &Frame) -> Bytes {
        let mut out = String::with_capacity(frame.payload.len() + frame.origin_node_id.len() + 16);
        out.push_str(frame.message_id.as_str());
        out.push(SEPARATOR);
        out.push_str(&frame.part_index.to_string());
        out.push(SEPARATOR);
        Self::escape_into(&mut out, &frame.payload);
        out.push(SEPARATOR);
        Self::escape_into(&mut out, &frame.origin_node_id);
        out.push(SEPARATOR);
        out.push(if frame.is_last { '1' } else { '0' });
        Bytes::from(out)
    }

    fn decode(&self, raw: &[u8]) -> Result<Frame> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| MeshError::MalformedFrame(format!("invalid UTF-8: {}", e)))?;

        let fields = Self::split_fields(text)?;
        let [id, index, payload, origin, last]: [String; FIELD_COUNT] =
            fields.try_into().map_err(|fields: Vec<String>| {
                MeshError::MalformedFrame(format!(
                    "expected {} fields, got {}",
                    FIELD_COUNT,
                    fields.len()
                ))
            })?;

        let message_id = MessageId::new(id)
            .map_err(|e| MeshError::MalformedFrame(e.to_string()))?;
        let part_index = index
            .parse::<usize>()
            .map_err(|_| MeshError::MalformedFrame(format!("bad part index {:?}", index)))?;
        let is_last = match last.as_str() {
            "0" => false,
            "1" => true,
            other => {
                return Err(MeshError::MalformedFrame(format!(
                    "bad last-part flag {:?}",
                    other
                )))
            }
        };

        Ok(Frame {
            message_id,
            part_index,
            payload,
            origin_node_id: origin,
            is_last,
        })
    }

    fn format(&self) -> WireFormat {
        WireFormat::Delimited
    }
}
