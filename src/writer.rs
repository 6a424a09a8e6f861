//! Frame writing.
//!
//! Two ways to put frames on the wire:
//!
//! - [`write_frame`] writes one frame directly; the client calls it while
//!   holding its write lock, so it learns about a failed write immediately.
//! - [`spawn_writer_task`] starts a dedicated writer task fed by an mpsc
//!   channel; the server gives every connection one, and all handler tasks
//!   of that connection share its [`WriterHandle`].
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Handler N ─┘
//! ```
//!
//! One channel message is one whole frame, so concurrent responses never
//! interleave mid-frame.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::CodecType;
use crate::error::{Result, RpcError};
use crate::protocol::{encode_prefix, Header, PREFIX_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded length prefix.
    pub prefix: [u8; PREFIX_SIZE],
    /// Encoded header.
    pub header: Bytes,
    /// Encoded body.
    pub body: Bytes,
}

impl OutboundFrame {
    /// Encode `header` with `codec` and pair it with an already encoded body.
    pub fn new(header: &Header, body: Bytes, codec: CodecType) -> Result<Self> {
        let header = Bytes::from(codec.encode(header)?);
        let header_len = u32::try_from(header.len())
            .map_err(|_| RpcError::Protocol("header too large".to_string()))?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| RpcError::Protocol("body too large".to_string()))?;

        Ok(Self {
            prefix: encode_prefix(header_len, body_len),
            header,
            body,
        })
    }

    /// Encode both `header` and `body` with `codec`.
    pub fn encode<T: serde::Serialize + ?Sized>(
        header: &Header,
        body: &T,
        codec: CodecType,
    ) -> Result<Self> {
        let body = Bytes::from(codec.encode(body)?);
        Self::new(header, body, codec)
    }

    /// Total size of this frame (prefix + header + body).
    #[inline]
    pub fn size(&self) -> usize {
        PREFIX_SIZE + self.header.len() + self.body.len()
    }

    fn segments(&self) -> [&[u8]; 3] {
        [&self.prefix, &self.header, &self.body]
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across handler tasks.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame for the writer task.
    ///
    /// Waits while the channel is full.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| RpcError::Shutdown)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends once every [`WriterHandle`] is dropped and the queue is
/// drained; it then shuts the write half down.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives frames and writes them to the stream.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.clear();
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!(error = %e, frames = batch.len(), "write response failed");
            return Err(e);
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &OutboundFrame) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_batch(writer, std::slice::from_ref(frame)).await
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for segment in frame.segments() {
            let end = offset + segment.len();
            if !segment.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&segment[start..]));
            }
            offset = end;
        }
    }

    slices
}
