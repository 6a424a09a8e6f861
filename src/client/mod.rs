//! Client session.
//!
//! A [`Client`] multiplexes many outstanding calls over one connection:
//! 1. Write the handshake line
//! 2. Spawn the read loop
//! 3. Each call registers a pending entry and writes its frame under the
//!    write lock, so "assign seq" and "write that seq's frame" are atomic
//!    relative to other writers
//! 4. The read loop removes the matching entry for every response and fires
//!    its completion signal
//!
//! Any unreadable frame ends the session, and so does `close`: the read loop
//! marks the session closed (a write stuck behind a stalled peer gives up),
//! takes the write lock and resolves every pending call with the failure.
//!
//! # Example
//!
//! ```ignore
//! use callwire::{Client, Options};
//!
//! let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
//!
//! // Synchronous facade
//! let sum: i64 = client.call("Foo.Sum", &Args { num1: 1, num2: 3 }).await?;
//!
//! // Asynchronous facade
//! let call = client.go::<_, i64>("Foo.Sum", &Args { num1: 2, num2: 5 }).await;
//! let sum = call.await?;
//! ```

mod call;
mod pending;

pub use call::Call;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};

use crate::control::{write_options, Options, MAGIC_NUMBER};
use crate::error::{Result, RpcError};
use crate::protocol::{Frame, Header};
use crate::transport::{self, Address, FrameReader};
use crate::writer::{write_frame, OutboundFrame};
use pending::{PendingCall, PendingCalls};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A client session over one connection.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Client {
    inner: Arc<Inner>,
}

/// State shared between callers and the read loop.
struct Inner {
    options: Options,
    pending: PendingCalls,
    /// Write path. Held for the whole register + write of one frame.
    writer: Mutex<BoxedWriter>,
    /// Set once the session is closing or dead. Wakes the read loop and
    /// abandons any write stuck behind a peer that stopped reading.
    closed: watch::Sender<bool>,
}

impl Client {
    /// Start a session over an already connected stream.
    ///
    /// Writes the handshake, then spawns the read loop.
    pub async fn new<S>(stream: S, options: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        write_options(&mut write_half, &options).await?;

        let (closed, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            options,
            pending: PendingCalls::new(),
            writer: Mutex::new(Box::new(write_half)),
            closed,
        });

        let reader = FrameReader::new(read_half);
        tokio::spawn(Inner::receive(Arc::clone(&inner), reader));

        Ok(Self { inner })
    }

    /// Connect to `address` (`host:port`, `tcp@host:port`, `unix@path`).
    ///
    /// `options.connect_timeout` bounds connect plus handshake (zero means
    /// unbounded). The magic number is always the crate's own.
    pub async fn dial(address: &str, options: Options) -> Result<Self> {
        let address: Address = address.parse()?;
        let options = Options {
            magic_number: MAGIC_NUMBER,
            ..options
        };
        let budget = options.connect_timeout;

        let connect = async {
            let stream = transport::connect(&address).await?;
            Client::new(stream, options).await
        };

        if budget.is_zero() {
            return connect.await;
        }
        match tokio::time::timeout(budget, connect).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%address, ?budget, "connect timed out");
                Err(RpcError::ConnectTimeout(budget))
            }
        }
    }

    /// `true` until the session is closed or fails.
    pub fn is_available(&self) -> bool {
        self.inner.pending.is_available()
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Issue a call and return as soon as its frame is written.
    ///
    /// Await the returned [`Call`] for the reply. Failures before the frame
    /// reaches the wire (session shut down, encode or write error) resolve
    /// the call locally; a call that failed to send is never left pending.
    ///
    /// Not cancel safe: dropping this future mid-write leaves a partial frame
    /// on the stream. Dropping the returned `Call` is fine.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize + ?Sized,
    {
        let (entry, done) = PendingCall::new(service_method);
        let seq = self.inner.send(entry, service_method, args).await;
        Call::new(seq, service_method, self.inner.options.codec_type, done)
    }

    /// Issue a call and wait for its reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.go(service_method, args).await.await
    }

    /// Like [`call`](Self::call), but give up after `budget` (zero = unbounded).
    ///
    /// On expiry the pending entry is removed, so a late response is
    /// discarded by the read loop.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        budget: Duration,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let call = self.go::<A, R>(service_method, args).await;
        if budget.is_zero() {
            return call.await;
        }

        let seq = call.seq();
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.pending.remove(seq);
                tracing::debug!(seq, service_method, ?budget, "call timed out");
                Err(RpcError::CallTimeout(budget))
            }
        }
    }

    /// Close the session.
    ///
    /// Fails with [`RpcError::Shutdown`] if already closing. Outstanding
    /// calls are resolved by the read loop, not here. A call blocked writing
    /// to a peer that stopped reading gives up its write and the lock.
    pub async fn close(&self) -> Result<()> {
        self.inner.pending.mark_closing()?;
        self.inner.closed.send_replace(true);

        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.closed.send_replace(true);
    }
}

impl Inner {
    /// Register `call` and write its frame. Returns the assigned seq (0 if rejected).
    async fn send<A>(&self, call: PendingCall, service_method: &str, args: &A) -> u64
    where
        A: Serialize + ?Sized,
    {
        let mut closed = self.closed.subscribe();

        let mut writer = tokio::select! {
            writer = self.writer.lock() => writer,
            _ = closed.wait_for(|closed| *closed) => {
                call.resolve(Err(RpcError::Shutdown));
                return 0;
            }
        };

        let Ok(seq) = self.pending.register(call) else {
            return 0;
        };

        let header = Header::request(service_method, seq);
        let written = match OutboundFrame::encode(&header, args, self.options.codec_type) {
            Ok(frame) => tokio::select! {
                written = write_frame(&mut *writer, &frame) => written,
                _ = closed.wait_for(|closed| *closed) => Err(RpcError::Shutdown),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            tracing::debug!(seq, service_method, error = %e, "request not sent");
            if let Some(call) = self.pending.remove(seq) {
                call.resolve(Err(e));
            }
        }

        seq
    }

    /// Background read loop: one per session.
    async fn receive<R>(inner: Arc<Inner>, mut reader: FrameReader<R>)
    where
        R: AsyncRead + Unpin,
    {
        let codec = inner.options.codec_type;
        let mut closed = inner.closed.subscribe();

        let err = loop {
            let next = tokio::select! {
                _ = closed.wait_for(|closed| *closed) => break RpcError::Shutdown,
                next = reader.read_frame(codec) => next,
            };

            match next {
                Ok(Some(frame)) => inner.resolve(frame),
                Ok(None) => {
                    break RpcError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ))
                }
                Err(e) => break e,
            }
        };

        tracing::debug!(error = %err, "client read loop stopped");

        // Release any caller still stuck in a write before taking the lock.
        inner.closed.send_replace(true);
        let _writer = inner.writer.lock().await;
        let terminated = inner.pending.terminate_all(err);
        if terminated > 0 {
            tracing::debug!(terminated, "pending calls terminated");
        }
    }

    /// Hand one response to its waiting call.
    fn resolve(&self, frame: Frame) {
        let seq = frame.seq();
        let Some(call) = self.pending.remove(seq) else {
            // Never registered, or already given up on: the body is dropped.
            tracing::debug!(seq, "response for unknown call discarded");
            return;
        };

        if frame.header.is_error() {
            call.resolve(Err(RpcError::Remote(frame.header.error)));
        } else {
            call.resolve(Ok(frame.body));
        }
    }
}
