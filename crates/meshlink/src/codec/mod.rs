//! Wire codecs for frames
//!
//! Frame encoding is a strategy selected by [`WireFormat`]:
//!
//! - [`DelimitedCodec`] - canonical fixed-field format separated by 0x1F
//! - [`JsonCodec`] - tagged JSON object, larger but self-describing
//!
//! Both sides of a link must use the same strategy; nothing on the wire
//! identifies the encoding.

mod delimited;
mod json;

pub use delimited::{DelimitedCodec, ESCAPE, SEPARATOR};
pub use json::JsonCodec;

use bytes::Bytes;
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::WireFormat;
use crate::error::Result;
use crate::frame::Frame;

/// Encodes frames to transport payloads and back
pub trait WireCodec: Send + Sync + Debug {
    /// Encode a frame for transmission
    fn encode(&self, frame: &Frame) -> Bytes;

    /// Decode a received payload
    ///
    /// Returns [`MeshError::MalformedFrame`](crate::MeshError::MalformedFrame)
    /// when the payload does not describe exactly one valid frame.
    fn decode(&self, raw: &[u8]) -> Result<Frame>;

    /// The format this codec implements
    fn format(&self) -> WireFormat;
}

/// Build the codec for a configured wire format
pub fn codec_for(format: WireFormat) -> Arc<dyn WireCodec> {
    match format {
        WireFormat::Delimited => Arc::new(DelimitedCodec),
        WireFormat::Json => Arc::new(JsonCodec),
    }
}
