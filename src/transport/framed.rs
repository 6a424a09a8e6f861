//! Framed reading over an async byte stream.
//!
//! [`FrameReader`] owns the read half of a connection and a [`FrameBuffer`].
//! It serves the handshake line first and then one frame at a time.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::CodecType;
use crate::error::{Result, RpcError};
use crate::protocol::{Frame, FrameBuffer, RawFrame, DEFAULT_MAX_FRAME_SIZE};

/// Upper bound for the handshake line.
pub const MAX_HANDSHAKE_LINE: usize = 4096;

/// Read buffer size per syscall.
const READ_CHUNK: usize = 64 * 1024;

/// Reads the handshake line and frames from an `AsyncRead`.
pub struct FrameReader<R> {
    reader: R,
    buffer: FrameBuffer,
    chunk: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the default frame size limit.
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_size(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a reader with a custom frame size limit.
    pub fn with_max_frame_size(reader: R, max_frame_size: u32) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::with_max_frame_size(max_frame_size),
            chunk: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read more bytes into the frame buffer. Returns `false` on end of stream.
    async fn fill(&mut self) -> Result<bool> {
        self.chunk.clear();
        let n = self.reader.read_buf(&mut self.chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        self.buffer.extend(&self.chunk[..n]);
        Ok(true)
    }

    /// Read the `\n`-terminated handshake line.
    ///
    /// # Errors
    ///
    /// Fails on end of stream before the newline or an over-long line.
    pub async fn read_line(&mut self) -> Result<BytesMut> {
        loop {
            if let Some(line) = self.buffer.take_line(MAX_HANDSHAKE_LINE)? {
                return Ok(line);
            }
            if !self.fill().await? {
                return Err(RpcError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before handshake",
                )));
            }
        }
    }

    /// Read the next frame with its header still encoded.
    ///
    /// Returns `Ok(None)` on a clean end of stream (between frames). This
    /// method is cancel safe: bytes already read stay buffered.
    pub async fn read_raw_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            if let Some(frame) = self.buffer.try_extract_one()? {
                return Ok(Some(frame));
            }
            if !self.fill().await? {
                if self.buffer.has_partial_frame() {
                    return Err(RpcError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended inside a frame",
                    )));
                }
                return Ok(None);
            }
        }
    }

    /// Read the next frame and decode its header with `codec`.
    ///
    /// A header that does not decode is fatal for the stream: the caller
    /// cannot tell what the peer meant to send next.
    pub async fn read_frame(&mut self, codec: CodecType) -> Result<Option<Frame>> {
        match self.read_raw_frame().await? {
            Some(raw) => raw.decode(codec).map(Some),
            None => Ok(None),
        }
    }
}
