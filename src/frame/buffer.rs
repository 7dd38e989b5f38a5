//! Inbound frame accumulation.
//!
//! The single reader task of a connection feeds raw socket reads into a
//! [`FrameBuffer`], which reassembles complete frames across arbitrary
//! fragmentation. A state machine tracks progress:
//! - `WaitingForHeader`: need at least 9 bytes
//! - `WaitingForBody`: header parsed, need `body_length` more bytes
//!
//! All buffered data lives in one `BytesMut`; completed bodies are split
//! off without copying.

use bytes::{Bytes, BytesMut};

use super::header::{FrameHeader, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use crate::error::{Result, TransportError};

/// A reassembled raw frame: decoded header plus the wire body, still
/// compressed if the header says so.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Body exactly as it appeared on the wire.
    pub body: Bytes,
}

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForBody { header: FrameHeader },
}

/// Buffer reassembling complete frames from fragmented reads.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_body_size: u32,
}

impl FrameBuffer {
    /// Create a buffer with the default body-size bound.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a buffer with a custom body-size bound.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
            max_body_size,
        }
    }

    /// Feed raw bytes in and pull every now-complete frame out.
    ///
    /// Partial data is retained for the next push. An error here means the
    /// framing itself is broken (bad version byte, unknown opcode, body
    /// bound exceeded) and the connection must be condemned - after a
    /// framing error the byte position of later frames is unknowable.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<RawFrame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<RawFrame>> {
        match self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = FrameHeader::decode(&self.buffer[..HEADER_SIZE])?;
                if header.body_length > self.max_body_size {
                    return Err(TransportError::MalformedFrame(format!(
                        "declared body length {} exceeds bound {}",
                        header.body_length, self.max_body_size
                    )));
                }

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.body_length == 0 {
                    return Ok(Some(RawFrame {
                        header,
                        body: Bytes::new(),
                    }));
                }

                self.state = State::WaitingForBody { header };
                self.try_extract_one()
            }

            State::WaitingForBody { header } => {
                let needed = header.body_length as usize;
                if self.buffer.len() < needed {
                    return Ok(None);
                }

                let body = self.buffer.split_to(needed).freeze();
                self.state = State::WaitingForHeader;
                Ok(Some(RawFrame { header, body }))
            }
        }
    }

    /// Number of buffered but not yet consumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
