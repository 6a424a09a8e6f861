//! Protocol module - header, framing, and frame types.
//!
//! This module implements the frame stream that follows the handshake:
//! - 8-byte length prefix encoding/decoding
//! - `Header` carried in every frame
//! - Frame buffer for accumulating partial reads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{Frame, RawFrame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_prefix, encode_prefix, split_service_method, Header, DEFAULT_MAX_FRAME_SIZE,
    PREFIX_SIZE,
};
