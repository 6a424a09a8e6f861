//! Per-connection dispatcher.
//!
//! One dispatcher runs per accepted stream:
//! 1. Read and validate the handshake within the handshake timeout
//!    (rejection or expiry closes without a reply)
//! 2. Spawn the response writer task
//! 3. Read frames in order; resolve and decode each request, then hand it to
//!    a handler task
//! 4. On EOF or an unreadable frame, wait for every handler, then let the
//!    writer drain and close
//!
//! Each handler owns exactly one response. The method itself runs in a
//! separate task that never sees the writer, so when the handle timeout wins
//! the race the late result has nowhere to go.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

use super::registry::ServiceRegistry;
use super::service::{Argv, MethodType, Service};
use crate::codec::CodecType;
use crate::control::read_options;
use crate::error::RpcError;
use crate::protocol::{Frame, Header};
use crate::transport::FrameReader;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Per-connection limits, fixed by the server builder.
#[derive(Debug, Clone)]
pub(crate) struct ConnConfig {
    pub max_concurrent_handlers: usize,
    pub writer_config: WriterConfig,
    pub max_frame_size: u32,
    /// Budget for the handshake line; zero means unbounded.
    pub handshake_timeout: Duration,
}

/// A request ready to run.
struct Request {
    header: Header,
    method: Arc<MethodType>,
    argv: Argv,
}

/// Serve one connection until the peer goes away.
pub(crate) async fn serve_conn<S>(registry: Arc<ServiceRegistry>, config: ConnConfig, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::with_max_frame_size(read_half, config.max_frame_size);

    let handshake = read_options(&mut reader);
    let handshake = if config.handshake_timeout.is_zero() {
        Ok(handshake.await)
    } else {
        tokio::time::timeout(config.handshake_timeout, handshake).await
    };

    let options = match handshake {
        Ok(Ok(options)) => options,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "handshake rejected");
            let _ = write_half.shutdown().await;
            return;
        }
        Err(_) => {
            tracing::warn!(timeout = ?config.handshake_timeout, "handshake timed out");
            let _ = write_half.shutdown().await;
            return;
        }
    };
    let codec = options.codec_type;
    let handle_timeout = options.handle_timeout;
    tracing::debug!(%codec, ?handle_timeout, "connection accepted");

    let (writer, writer_task) = spawn_writer_task(write_half, config.writer_config);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1)));
    let mut handlers = JoinSet::new();

    loop {
        let frame = match reader.read_frame(codec).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "read header failed");
                break;
            }
        };

        // Reap finished handlers so the set stays small on long connections.
        while handlers.try_join_next().is_some() {}

        let request = match prepare(&registry, frame, codec) {
            Ok(request) => request,
            Err((header, e)) => {
                tracing::debug!(seq = header.seq, service_method = %header.service_method, error = %e, "request rejected");
                send_response(&writer, header.with_error(e.to_string()), None, codec).await;
                continue;
            }
        };

        // Reading pauses here while the handler limit is reached.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        handlers.spawn(handle_request(
            request,
            writer.clone(),
            codec,
            handle_timeout,
            permit,
        ));
    }

    while handlers.join_next().await.is_some() {}
    drop(writer);

    match writer_task.await {
        Ok(Ok(())) => tracing::debug!("connection closed"),
        Ok(Err(e)) => tracing::debug!(error = %e, "connection closed after write failure"),
        Err(e) => tracing::error!(error = %e, "writer task failed"),
    }
}

/// Resolve the target method and decode the argument.
fn prepare(
    registry: &ServiceRegistry,
    frame: Frame,
    codec: CodecType,
) -> Result<Request, (Header, RpcError)> {
    let Frame { header, body } = frame;

    let method = match registry.find_service(&header.service_method) {
        Ok((_, method)) => method,
        Err(e) => return Err((header, e)),
    };
    let argv = match method.decode_argv(codec, &body) {
        Ok(argv) => argv,
        Err(e) => return Err((header, e)),
    };

    Ok(Request {
        header,
        method,
        argv,
    })
}

/// Run one request and write its single response.
async fn handle_request(
    request: Request,
    writer: WriterHandle,
    codec: CodecType,
    handle_timeout: Duration,
    _permit: OwnedSemaphorePermit,
) {
    let Request {
        header,
        method,
        argv,
    } = request;

    let invocation = tokio::spawn(Service::call(&method, argv, codec));

    let outcome = if handle_timeout.is_zero() {
        invocation.await
    } else {
        match tokio::time::timeout(handle_timeout, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Dropping the JoinHandle detaches the invocation.
                tracing::warn!(seq = header.seq, service_method = %header.service_method, ?handle_timeout, "request handle timeout");
                let error = RpcError::HandleTimeout(handle_timeout).to_string();
                send_response(&writer, header.with_error(error), None, codec).await;
                return;
            }
        }
    };

    match outcome {
        Ok(Ok(reply)) => send_response(&writer, header, Some(reply), codec).await,
        Ok(Err(error)) => {
            tracing::debug!(seq = header.seq, service_method = %header.service_method, %error, "method returned error");
            send_response(&writer, header.with_error(error), None, codec).await;
        }
        Err(e) => {
            let error = panic_error(e);
            tracing::error!(seq = header.seq, service_method = %header.service_method, %error, "method failed");
            send_response(&writer, header.with_error(error.to_string()), None, codec).await;
        }
    }
}

fn panic_error(e: JoinError) -> RpcError {
    if e.is_panic() {
        RpcError::Internal("method panicked".to_string())
    } else {
        RpcError::Internal(e.to_string())
    }
}

/// Queue one response. Error responses carry an empty body.
async fn send_response(writer: &WriterHandle, header: Header, body: Option<Bytes>, codec: CodecType) {
    let frame = match body {
        Some(body) => OutboundFrame::new(&header, body, codec),
        None => OutboundFrame::encode(&header, &(), codec),
    };

    let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(seq = header.seq, error = %e, "encode response failed");
            return;
        }
    };

    if let Err(e) = writer.send(frame).await {
        tracing::debug!(seq = header.seq, error = %e, "write response failed");
    }
}
