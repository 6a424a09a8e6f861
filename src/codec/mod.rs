//! Codec module - serialization of headers and bodies.
//!
//! The handshake selects one [`CodecType`] per connection; both sides then
//! encode every `Header` and body with it:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`, default)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are marker structs with static methods. [`CodecType`] is the
//! runtime selector carried by the handshake and dispatches to them.
//!
//! # Example
//!
//! ```
//! use callwire::codec::CodecType;
//!
//! let encoded = CodecType::Json.encode(&"hello").unwrap();
//! let decoded: String = CodecType::Json.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Codec selector exchanged in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CodecType {
    /// MessagePack (struct-as-map).
    #[default]
    #[serde(rename = "application/msgpack")]
    MsgPack,
    /// JSON.
    #[serde(rename = "application/json")]
    Json,
}

impl CodecType {
    /// Content-type style name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecType::MsgPack => "application/msgpack",
            CodecType::Json => "application/json",
        }
    }

    /// Encode a value with this codec.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::MsgPack => MsgPackCodec::encode(value),
            CodecType::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value with this codec.
    #[inline]
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::MsgPack => MsgPackCodec::decode(bytes),
            CodecType::Json => JsonCodec::decode(bytes),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
