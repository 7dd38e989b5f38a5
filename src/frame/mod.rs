//! Wire frame layer: header layout, codec, and inbound reassembly.
//!
//! One frame is one discrete protocol message: a fixed 9-byte header
//! followed by an opaque body. Requests and responses share the layout and
//! are told apart by disjoint version-byte ranges.

mod buffer;
mod codec;
mod header;

pub use buffer::{FrameBuffer, RawFrame};
pub use codec::{Compression, CompressionCodec, FrameCodec, Request, Response};
pub use header::{
    flags, Direction, FrameHeader, Opcode, ProtocolVersion, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE,
};
