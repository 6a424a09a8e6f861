//! Handshake record and its exchange.
//!
//! # Example
//!
//! ```
//! use callwire::control::{build_options_line, Options};
//! use callwire::CodecType;
//!
//! let opts = Options::default().with_codec(CodecType::Json);
//! let line = build_options_line(&opts).unwrap();
//! assert!(line.ends_with('\n'));
//! assert!(line.contains("application/json"));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecType;
use crate::error::{Result, RpcError};
use crate::transport::FrameReader;

/// Identifies the protocol family in every handshake.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default budget for connecting plus handshaking.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol parameters fixed for the life of a connection.
///
/// Zero durations mean "unbounded".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic_number: u32,
    /// Codec for every header and body after the handshake.
    pub codec_type: CodecType,
    /// Budget for connecting plus handshaking (client side).
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Budget the server gives each request.
    #[serde(with = "duration_ms")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Use `codec` for the connection.
    pub fn with_codec(mut self, codec: CodecType) -> Self {
        self.codec_type = codec;
        self
    }

    /// Bound connect + handshake (zero = unbounded).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Ask the server to bound each request (zero = unbounded).
    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Check that the peer speaks this protocol.
    pub fn validate(&self) -> Result<()> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::InvalidMagicNumber(self.magic_number));
        }
        Ok(())
    }
}

/// Build the handshake line (JSON + `\n`).
pub fn build_options_line(options: &Options) -> Result<String> {
    let mut line = serde_json::to_string(options)?;
    line.push('\n');
    Ok(line)
}

/// Write the handshake line and flush.
pub async fn write_options<W>(writer: &mut W, options: &Options) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let line = build_options_line(options)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and validate the handshake line.
///
/// # Errors
///
/// Malformed JSON, an unknown codec, or a wrong magic number.
pub async fn read_options<R>(reader: &mut FrameReader<R>) -> Result<Options>
where
    R: AsyncRead + Unpin,
{
    let line = reader.read_line().await?;
    let options: Options = serde_json::from_slice(&line)?;
    options.validate()?;
    Ok(options)
}

/// Durations as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
