//! Control plane module - the connection handshake.
//!
//! Before any frame flows, the client writes one JSON line describing the
//! protocol parameters for the connection:
//!
//! ```text
//! {"magicNumber":3927900,"codecType":"application/msgpack","connectTimeout":10000,"handleTimeout":0}
//! ```
//!
//! # Workflow
//!
//! 1. Client connects
//! 2. Client writes [`Options`] as a JSON line
//! 3. Server validates the magic number and codec
//! 4. Framed communication begins with the negotiated codec
//!
//! A server that rejects the line closes the connection without replying.

mod handshake;

pub use handshake::{
    build_options_line, read_options, write_options, Options, DEFAULT_CONNECT_TIMEOUT,
    MAGIC_NUMBER,
};
