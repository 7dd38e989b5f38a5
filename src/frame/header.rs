//! Wire header encoding and decoding.
//!
//! Implements the 9-byte header format:
//! ```text
//! ┌─────────┬───────┬───────────┬────────┬───────────┐
//! │ Version │ Flags │ Stream id │ Opcode │ Body len  │
//! │ 1 byte  │ 1 byte│ 1 byte i8 │ 1 byte │ 4 bytes   │
//! │         │       │           │        │ uint32 BE │
//! └─────────┴───────┴───────────┴────────┴───────────┘
//! ```
//!
//! Request and response frames share this layout but use disjoint version
//! markers: requests carry 0x01/0x02, responses 0x81/0x82.

use crate::error::{Result, TransportError};

/// Header size in bytes (fixed, exactly 9).
pub const HEADER_SIZE: usize = 9;

/// Default maximum body size accepted on decode (256 MB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 256 * 1024 * 1024;

/// High bit distinguishing response version markers from request markers.
const RESPONSE_DIRECTION_BIT: u8 = 0x80;

/// Header flag bits.
pub mod flags {
    /// Body is compressed with the negotiated codec.
    pub const COMPRESSED: u8 = 0x01;
    /// Tracing requested / tracing id present.
    pub const TRACING: u8 = 0x02;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Protocol versions this transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Version 1 (request marker 0x01, response marker 0x81).
    V1,
    /// Version 2 (request marker 0x02, response marker 0x82).
    #[default]
    V2,
}

impl ProtocolVersion {
    /// The version byte written on request frames.
    #[inline]
    pub fn request_marker(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 0x01,
            ProtocolVersion::V2 => 0x02,
        }
    }

    /// The version byte expected on response frames.
    #[inline]
    pub fn response_marker(self) -> u8 {
        self.request_marker() | RESPONSE_DIRECTION_BIT
    }

    /// Recognize any valid version byte, request or response.
    pub fn from_marker(byte: u8) -> Option<(ProtocolVersion, Direction)> {
        let direction = if byte & RESPONSE_DIRECTION_BIT != 0 {
            Direction::Response
        } else {
            Direction::Request
        };
        match byte & !RESPONSE_DIRECTION_BIT {
            0x01 => Some((ProtocolVersion::V1, direction)),
            0x02 => Some((ProtocolVersion::V2, direction)),
            _ => None,
        }
    }
}

/// Whether a frame travels client-to-server or back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server (version markers 0x01/0x02).
    Request,
    /// Server to client (version markers 0x81/0x82).
    Response,
}

/// Protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl TryFrom<u8> for Opcode {
    type Error = TransportError;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x09 => Opcode::Prepare,
            0x0A => Opcode::Execute,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            0x0D => Opcode::Batch,
            0x0E => Opcode::AuthChallenge,
            0x0F => Opcode::AuthResponse,
            0x10 => Opcode::AuthSuccess,
            other => {
                return Err(TransportError::MalformedFrame(format!(
                    "unknown opcode 0x{other:02x}"
                )))
            }
        })
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version of the frame.
    pub version: ProtocolVersion,
    /// Request or response marker range.
    pub direction: Direction,
    /// Flags byte (see [`flags`]).
    pub flags: u8,
    /// Stream id correlating request and response. Negative ids are
    /// reserved for server-initiated events.
    pub stream: i8,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Body length in bytes. Always equals the actual encoded body size.
    pub body_length: u32,
}

impl FrameHeader {
    /// Build a request header.
    pub fn request(
        version: ProtocolVersion,
        flags: u8,
        stream: i8,
        opcode: Opcode,
        body_length: u32,
    ) -> Self {
        Self {
            version,
            direction: Direction::Request,
            flags,
            stream,
            opcode,
            body_length,
        }
    }

    /// Encode this header into its 9-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = match self.direction {
            Direction::Request => self.version.request_marker(),
            Direction::Response => self.version.response_marker(),
        };
        buf[1] = self.flags;
        buf[2] = self.stream as u8;
        buf[3] = self.opcode as u8;
        buf[4..8].copy_from_slice(&self.body_length.to_be_bytes());
        buf
    }

    /// Decode a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// Fails with [`TransportError::MalformedFrame`] on a short buffer, an
    /// unrecognized version marker, or an unknown opcode.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(TransportError::MalformedFrame(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let (version, direction) = ProtocolVersion::from_marker(buf[0]).ok_or_else(|| {
            TransportError::MalformedFrame(format!("unrecognized version byte 0x{:02x}", buf[0]))
        })?;
        Ok(Self {
            version,
            direction,
            flags: buf[1],
            stream: buf[2] as i8,
            opcode: Opcode::try_from(buf[3])?,
            body_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Check if the body is compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        flags::has_flag(self.flags, flags::COMPRESSED)
    }

    /// Check if this is a response frame.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.direction == Direction::Response
    }

    /// Check if this is a server-initiated event (negative stream id).
    #[inline]
    pub fn is_event(&self) -> bool {
        self.stream < 0
    }
}
