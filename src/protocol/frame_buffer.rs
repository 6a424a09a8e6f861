//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForPrefix`: Need at least 8 bytes
//! - `WaitingForSegments`: Prefix parsed, need header + body bytes
//!
//! Before the first frame the same buffer also serves the handshake line
//! (see [`FrameBuffer::take_line`]), so bytes that arrive right behind the
//! newline are kept for the frame parser.
//!
//! # Example
//!
//! ```
//! use callwire::protocol::{encode_prefix, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let mut bytes = encode_prefix(2, 3).to_vec();
//! bytes.extend_from_slice(b"hibod");
//!
//! buffer.extend(&bytes[..4]);
//! assert!(buffer.try_extract_one().unwrap().is_none());
//!
//! buffer.extend(&bytes[4..]);
//! let frame = buffer.try_extract_one().unwrap().unwrap();
//! assert_eq!(&frame.header[..], b"hi");
//! assert_eq!(&frame.body[..], b"bod");
//! assert!(!buffer.has_partial_frame());
//! ```

use bytes::BytesMut;

use super::frame::RawFrame;
use super::wire_format::{decode_prefix, DEFAULT_MAX_FRAME_SIZE, PREFIX_SIZE};
use crate::error::{Result, RpcError};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for complete prefix (need 8 bytes).
    WaitingForPrefix,
    /// Prefix parsed, waiting for header and body bytes.
    WaitingForSegments { header_len: usize, body_len: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed header + body size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 64MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with custom max frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForPrefix,
            max_frame_size,
        }
    }

    /// Append data and extract all complete frames.
    #[cfg(test)]
    pub(crate) fn push(&mut self, data: &[u8]) -> Result<Vec<RawFrame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if protocol violation (frame too large)
    pub fn try_extract_one(&mut self) -> Result<Option<RawFrame>> {
        if let State::WaitingForPrefix = self.state {
            let Some((header_len, body_len)) = decode_prefix(&self.buffer) else {
                return Ok(None);
            };

            let total = u64::from(header_len) + u64::from(body_len);
            if total > u64::from(self.max_frame_size) {
                return Err(RpcError::Protocol(format!(
                    "Frame size {} exceeds maximum {}",
                    total, self.max_frame_size
                )));
            }

            let _ = self.buffer.split_to(PREFIX_SIZE);
            self.state = State::WaitingForSegments {
                header_len: header_len as usize,
                body_len: body_len as usize,
            };
        }

        let State::WaitingForSegments {
            header_len,
            body_len,
        } = self.state
        else {
            return Ok(None);
        };

        if self.buffer.len() < header_len + body_len {
            return Ok(None);
        }

        let header = self.buffer.split_to(header_len).freeze();
        let body = self.buffer.split_to(body_len).freeze();
        self.state = State::WaitingForPrefix;

        Ok(Some(RawFrame::new(header, body)))
    }

    /// Take one `\n`-terminated line from the front of the buffer.
    ///
    /// Only meaningful before the first frame. The newline is consumed but
    /// not returned. Returns `Ok(None)` if no complete line is buffered yet.
    ///
    /// # Errors
    ///
    /// Returns error if `max_len` bytes are buffered without a newline.
    pub fn take_line(&mut self, max_len: usize) -> Result<Option<BytesMut>> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) if pos <= max_len => {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                Ok(Some(line))
            }
            Some(_) => Err(RpcError::Protocol(format!(
                "handshake line exceeds {max_len} bytes"
            ))),
            None if self.buffer.len() > max_len => Err(RpcError::Protocol(format!(
                "handshake line exceeds {max_len} bytes"
            ))),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if a frame has been started but not completed.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForSegments { .. })
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForPrefix => "WaitingForPrefix",
            State::WaitingForSegments { .. } => "WaitingForSegments",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
