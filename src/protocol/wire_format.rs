//! Wire format encoding and decoding.
//!
//! Every frame starts with an 8-byte prefix, followed by the encoded
//! [`Header`] and then the encoded body:
//! ```text
//! ┌────────────┬────────────┬─────────────────┬───────────────┐
//! │ Header len │ Body len   │ Header          │ Body          │
//! │ 4 bytes    │ 4 bytes    │ header_len bytes│ body_len bytes│
//! │ uint32 BE  │ uint32 BE  │ (codec)         │ (codec)       │
//! └────────────┴────────────┴─────────────────┴───────────────┘
//! ```
//!
//! The prefix makes the body skippable without decoding it, which is how a
//! reader discards a body nobody is waiting for.

use serde::{Deserialize, Serialize};

/// Prefix size in bytes (fixed, exactly 8).
pub const PREFIX_SIZE: usize = 8;

/// Default maximum size of header + body (64 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Header preceding every body on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Target in `"Service.Method"` form.
    pub service_method: String,
    /// Sequence number chosen by the client (0 is never issued).
    pub seq: u64,
    /// Error text; empty means success.
    #[serde(default)]
    pub error: String,
}

impl Header {
    /// Create a request header.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Check if this header reports an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Copy of this header carrying `error`.
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        Self {
            service_method: self.service_method.clone(),
            seq: self.seq,
            error: error.into(),
        }
    }
}

/// Encode the frame prefix (Big Endian).
///
/// # Example
///
/// ```
/// use callwire::protocol::{decode_prefix, encode_prefix};
///
/// let bytes = encode_prefix(12, 300);
/// assert_eq!(decode_prefix(&bytes), Some((12, 300)));
/// ```
#[inline]
pub fn encode_prefix(header_len: u32, body_len: u32) -> [u8; PREFIX_SIZE] {
    let mut buf = [0u8; PREFIX_SIZE];
    buf[0..4].copy_from_slice(&header_len.to_be_bytes());
    buf[4..8].copy_from_slice(&body_len.to_be_bytes());
    buf
}

/// Decode the frame prefix.
///
/// Returns `None` if buffer is too short.
#[inline]
pub fn decode_prefix(buf: &[u8]) -> Option<(u32, u32)> {
    if buf.len() < PREFIX_SIZE {
        return None;
    }
    Some((
        u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
    ))
}

/// Split `"Service.Method"` on the last dot.
///
/// Returns `None` when there is no dot.
pub fn split_service_method(service_method: &str) -> Option<(&str, &str)> {
    service_method.rsplit_once('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_big_endian_byte_order() {
        let bytes = encode_prefix(0x01020304, 0x05060708);
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; PREFIX_SIZE - 1];
        assert!(decode_prefix(&buf).is_none());
    }

    #[test]
    fn test_header_json_field_names() {
        let header = Header::request("Foo.Sum", 7);
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["serviceMethod"], "Foo.Sum");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["error"], "");
    }

    #[test]
    fn test_header_error_accessors() {
        let header = Header::request("Foo.Sum", 1);
        assert!(!header.is_error());

        let failed = header.with_error("boom");
        assert!(failed.is_error());
        assert_eq!(failed.seq, 1);
        assert_eq!(failed.service_method, "Foo.Sum");
    }

    #[test]
    fn test_split_service_method_uses_last_dot() {
        assert_eq!(split_service_method("Foo.Sum"), Some(("Foo", "Sum")));
        assert_eq!(split_service_method("a.b.Sum"), Some(("a.b", "Sum")));
        assert_eq!(split_service_method("FooSum"), None);
    }
}
