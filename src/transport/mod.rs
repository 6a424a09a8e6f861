//! Transport module - byte streams and framed reading.
//!
//! Provides:
//! - [`Address`] - `host:port`, `tcp@host:port`, or `unix@path`
//! - [`connect`] - open a boxed stream to an address
//! - [`FrameReader`] - handshake line + frame reader over any `AsyncRead`

mod address;
mod framed;

pub use address::{connect, Address, AsyncStream, BoxedStream};
pub use framed::{FrameReader, MAX_HANDSHAKE_LINE};
