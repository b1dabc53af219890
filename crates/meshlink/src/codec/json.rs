//! JSON frame encoding
//!
//! `{"id":"aB3","part":0,"msg":"...","origin":"NODE-7","last":true}`

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::WireCodec;
use crate::config::WireFormat;
use crate::error::Result;
use crate::frame::{Frame, MessageId};

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonFrame {
    id: MessageId,
    part: usize,
    msg: String,
    origin: String,
    last: bool,
}

/// Self-describing JSON codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, frame: &Frame) -> Bytes {
        let wire = JsonFrame {
            id: frame.message_id.clone(),
            part: frame.part_index,
            msg: frame.payload.clone(),
            origin: frame.origin_node_id.clone(),
            last: frame.is_last,
        };
        // A struct of strings, integers and bools always serializes
        Bytes::from(serde_json::to_vec(&wire).unwrap_or_default())
    }

    fn decode(&self, raw: &[u8]) -> Result<Frame> {
        let wire: JsonFrame = serde_json::from_slice(raw)?;
        Ok(Frame {
            message_id: wire.id,
            part_index: wire.part,
            payload: wire.msg,
            origin_node_id: wire.origin,
            is_last: wire.last,
        })
    }

    fn format(&self) -> WireFormat {
        WireFormat::Json
    }
}
