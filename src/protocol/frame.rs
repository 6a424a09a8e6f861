//! Frame structs.
//!
//! A [`RawFrame`] is what the frame buffer cuts out of the stream: header and
//! body bytes, still encoded. Decoding the header with the negotiated codec
//! yields a [`Frame`]; the body stays encoded until someone knows its type.

use bytes::Bytes;

use super::wire_format::Header;
use crate::codec::CodecType;
use crate::error::Result;

/// A delimited frame whose header has not been decoded yet.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Encoded header bytes.
    pub header: Bytes,
    /// Encoded body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl RawFrame {
    /// Create a raw frame from its two segments.
    pub fn new(header: Bytes, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Decode the header with the negotiated codec.
    pub fn decode(self, codec: CodecType) -> Result<Frame> {
        let header = codec.decode(&self.header)?;
        Ok(Frame {
            header,
            body: self.body,
        })
    }
}

/// A frame with its header decoded.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Encoded body bytes.
    pub body: Bytes,
}

impl Frame {
    /// Get the sequence number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    /// Decode the body into `T`.
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self, codec: CodecType) -> Result<T> {
        codec.decode(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_header_then_body() {
        let codec = CodecType::MsgPack;
        let header = Header::request("Foo.Sum", 3);
        let raw = RawFrame::new(
            Bytes::from(codec.encode(&header).unwrap()),
            Bytes::from(codec.encode(&42i64).unwrap()),
        );

        let frame = raw.decode(codec).unwrap();
        assert_eq!(frame.header, header);
        assert_eq!(frame.seq(), 3);
        assert_eq!(frame.decode_body::<i64>(codec).unwrap(), 42);
    }

    #[test]
    fn test_garbage_header_fails() {
        let raw = RawFrame::new(Bytes::from_static(b"\xff\xff"), Bytes::new());
        assert!(raw.decode(CodecType::MsgPack).is_err());
    }
}
