//! Frame encoding and decoding.
//!
//! The [`FrameCodec`] turns a logical [`Request`] into wire bytes and a raw
//! inbound frame into a [`Response`]. It holds no per-frame state, so a
//! single codec is shared freely between the many writer callers and the
//! one reader task of a connection.
//!
//! Body compression is delegated to a pluggable [`CompressionCodec`]. The
//! codec itself never decides *whether* to compress - minimum-size
//! thresholds and similar policy belong to the caller.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use super::header::{flags, FrameHeader, Opcode, ProtocolVersion, HEADER_SIZE};
use crate::error::{Result, TransportError};

/// Compression algorithms the wire protocol can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Block codec.
    Lz4,
    /// Byte-oriented general-purpose codec.
    Snappy,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Lz4 => write!(f, "lz4"),
            Compression::Snappy => write!(f, "snappy"),
        }
    }
}

/// Plug-in contract for body compression.
///
/// Implementations must be stateless per call: the same codec instance is
/// used concurrently for different frames.
pub trait CompressionCodec: Send + Sync {
    /// Which algorithm this codec implements.
    fn kind(&self) -> Compression;

    /// Compress a clear body.
    fn compress(&self, body: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a compressed body back to the clear form.
    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>>;
}

/// A logical request before framing.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request opcode.
    pub opcode: Opcode,
    /// Serialized request body. Opaque to the transport.
    pub body: Bytes,
    /// Ask the server for a tracing id on the response.
    pub tracing: bool,
    /// Compress the body if the connection negotiated a codec. Whether a
    /// given body is worth compressing is the caller's call.
    pub compress: bool,
}

impl Request {
    /// Build a request from an opcode and body bytes.
    pub fn new(opcode: Opcode, body: Bytes) -> Self {
        Self {
            opcode,
            body,
            tracing: false,
            compress: false,
        }
    }
}

/// A decoded logical response, body already decompressed.
#[derive(Debug, Clone)]
pub struct Response {
    /// The decoded header. `body_length` refers to the wire body, which
    /// may differ from `body.len()` when the frame was compressed.
    pub header: FrameHeader,
    /// Clear body bytes.
    pub body: Bytes,
}

impl Response {
    /// Response opcode.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }
}

/// Stateless frame encoder/decoder, shareable across threads.
#[derive(Clone, Default)]
pub struct FrameCodec {
    compression: Option<Arc<dyn CompressionCodec>>,
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("compression", &self.compression.as_ref().map(|c| c.kind()))
            .finish()
    }
}

impl FrameCodec {
    /// A codec with no compression configured.
    pub fn new() -> Self {
        Self { compression: None }
    }

    /// A codec delegating body compression to `codec`.
    pub fn with_compression(codec: Arc<dyn CompressionCodec>) -> Self {
        Self {
            compression: Some(codec),
        }
    }

    /// The negotiated compression algorithm, if any.
    pub fn compression(&self) -> Option<Compression> {
        self.compression.as_ref().map(|c| c.kind())
    }

    /// Encode `request` into a complete wire frame for `stream`.
    ///
    /// If `compress` is set and a compression codec is configured, the body
    /// goes through the codec's compress step before the length is computed
    /// and the compressed flag is set on the header.
    pub fn encode_request(
        &self,
        request: &Request,
        stream: i8,
        version: ProtocolVersion,
        compress: bool,
    ) -> Result<Bytes> {
        let mut flag_bits = 0u8;
        if request.tracing {
            flag_bits |= flags::TRACING;
        }

        let body: Bytes = match (&self.compression, compress) {
            (Some(codec), true) => {
                flag_bits |= flags::COMPRESSED;
                Bytes::from(codec.compress(&request.body)?)
            }
            _ => request.body.clone(),
        };

        let header = FrameHeader::request(
            version,
            flag_bits,
            stream,
            request.opcode,
            body.len() as u32,
        );

        let mut frame = BytesMut::with_capacity(HEADER_SIZE + body.len());
        frame.put_slice(&header.encode());
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    /// Turn a raw inbound frame into a [`Response`], reversing compression
    /// when the header's compressed flag is set.
    ///
    /// A compressed frame arriving with no codec configured is a framing
    /// fault: the body cannot be interpreted.
    pub fn decode_body(&self, header: FrameHeader, raw_body: Bytes) -> Result<Response> {
        debug_assert_eq!(header.body_length as usize, raw_body.len());

        let body = if header.is_compressed() {
            let codec = self.compression.as_ref().ok_or_else(|| {
                TransportError::MalformedFrame(
                    "compressed frame received but no compression negotiated".into(),
                )
            })?;
            Bytes::from(codec.decompress(&raw_body)?)
        } else {
            raw_body
        };

        Ok(Response { header, body })
    }
}
