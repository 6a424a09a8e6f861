//! The caller's view of one outstanding call.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use super::pending::CallOutcome;
use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// One issued call, resolving to its decoded reply.
///
/// Returned by [`Client::go`](super::Client::go). Awaiting it waits for the
/// completion signal; the reply body is decoded into `R` at that point and a
/// decode failure becomes the call's error. Dropping a `Call` only stops
/// waiting: the response, if any, is discarded by the read loop.
#[must_use = "a Call does nothing unless awaited"]
pub struct Call<R> {
    seq: u64,
    service_method: String,
    codec: CodecType,
    done: oneshot::Receiver<CallOutcome>,
    _reply: PhantomData<fn() -> R>,
}

impl<R> Call<R> {
    pub(crate) fn new(
        seq: u64,
        service_method: impl Into<String>,
        codec: CodecType,
        done: oneshot::Receiver<CallOutcome>,
    ) -> Self {
        Self {
            seq,
            service_method: service_method.into(),
            codec,
            done,
            _reply: PhantomData,
        }
    }

    /// Sequence number, or 0 if the call was rejected before registration.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Target in `"Service.Method"` form.
    pub fn service_method(&self) -> &str {
        &self.service_method
    }
}

impl<R> fmt::Debug for Call<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("seq", &self.seq)
            .field("service_method", &self.service_method)
            .finish_non_exhaustive()
    }
}

impl<R: DeserializeOwned> Future for Call<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let codec = self.codec;
        match Pin::new(&mut self.done).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(body))) => Poll::Ready(codec.decode(&body)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            // The session went away without resolving the entry.
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Shutdown)),
        }
    }
}
