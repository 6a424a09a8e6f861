//! Server addresses and connecting to them.
//!
//! # Example
//!
//! ```
//! use callwire::transport::Address;
//!
//! let addr: Address = "tcp@127.0.0.1:9999".parse().unwrap();
//! assert_eq!(addr, Address::Tcp("127.0.0.1:9999".to_string()));
//! ```

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, RpcError};

/// Any bidirectional byte stream usable as a connection.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A connected stream of unknown concrete type.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Where a server listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// TCP `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(String),
}

impl FromStr for Address {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        let (protocol, addr) = match s.split_once('@') {
            Some((protocol, addr)) => (protocol, addr),
            None => ("tcp", s),
        };

        if addr.is_empty() {
            return Err(RpcError::InvalidAddress(s.to_string()));
        }

        match protocol {
            "tcp" => Ok(Address::Tcp(addr.to_string())),
            #[cfg(unix)]
            "unix" => Ok(Address::Unix(addr.to_string())),
            _ => Err(RpcError::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "tcp@{addr}"),
            #[cfg(unix)]
            Address::Unix(path) => write!(f, "unix@{path}"),
        }
    }
}

/// Connect to `address`.
pub async fn connect(address: &Address) -> Result<BoxedStream> {
    match address {
        Address::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Address::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_host_port_is_tcp() {
        let addr: Address = "localhost:7000".parse().unwrap();
        assert_eq!(addr, Address::Tcp("localhost:7000".to_string()));
        assert_eq!(addr.to_string(), "tcp@localhost:7000");
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_unix() {
        let addr: Address = "unix@/tmp/callwire.sock".parse().unwrap();
        assert_eq!(addr, Address::Unix("/tmp/callwire.sock".to_string()));
    }

    #[test]
    fn test_parse_rejects_unknown_protocol_and_empty() {
        assert!(matches!(
            "http@127.0.0.1:80".parse::<Address>(),
            Err(RpcError::InvalidAddress(_))
        ));
        assert!(matches!(
            "tcp@".parse::<Address>(),
            Err(RpcError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Address::Tcp(listener.local_addr().unwrap().to_string());

        let (stream, accepted) = tokio::join!(connect(&addr), listener.accept());
        assert!(stream.is_ok());
        assert!(accepted.is_ok());
    }
}
