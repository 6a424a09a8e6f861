//! Error types for callwire.
//!
//! Errors fall into three groups:
//! - protocol-fatal (bad handshake, unreadable frame): the connection ends
//! - per-call (unknown method, decode failure, business error, timeout):
//!   one error response, the connection survives
//! - local (shutdown, write failure): resolved on the call without a round trip

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Main error type for all callwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (handshake and JSON codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized frame, truncated stream, bad handshake line).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer sent a handshake for a different protocol family.
    #[error("invalid magic number {0:#x}")]
    InvalidMagicNumber(u32),

    /// The session is closing or already shut down.
    #[error("connection is shut down")]
    Shutdown,

    /// The session ended while the call was pending.
    #[error("connection terminated: {0}")]
    Terminated(Arc<RpcError>),

    /// A `"Service.Method"` string without a separator.
    #[error("service/method request ill-formed: {0}")]
    MalformedServiceMethod(String),

    /// No service registered under this name.
    #[error("can't find service {0}")]
    ServiceNotFound(String),

    /// The service exists but has no such method.
    #[error("can't find method {0}")]
    MethodNotFound(String),

    /// A service with the same name is already registered.
    #[error("service already defined: {0}")]
    ServiceAlreadyDefined(String),

    /// The service name is not public (must start with an uppercase letter).
    #[error("{0} is not a valid service name")]
    InvalidServiceName(String),

    /// Error text reported by the server for one call.
    #[error("{0}")]
    Remote(String),

    /// The server gave up on a request after its handle timeout.
    #[error("request handle timeout: expect within {0:?}")]
    HandleTimeout(Duration),

    /// The client gave up waiting for a reply.
    #[error("call failed: no reply within {0:?}")]
    CallTimeout(Duration),

    /// Connecting plus handshaking did not finish in time.
    #[error("connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// The discovery directory is empty.
    #[error("no available servers")]
    NoAvailableServers,

    /// An address that is neither `host:port`, `tcp@host:port`, nor `unix@path`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Failure inside the engine (handler panic, type mismatch).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
