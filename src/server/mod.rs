//! Server: service registration and connection acceptance.
//!
//! The [`ServerBuilder`] fixes per-connection limits; the [`Server`] holds the
//! service registry and runs one dispatcher per accepted connection.
//!
//! # Example
//!
//! ```ignore
//! use callwire::{Server, Service};
//!
//! struct Foo;
//!
//! let server = Server::builder().max_concurrent_handlers(64).build();
//! server.register(
//!     Service::builder(Foo)
//!         .method("Sum", |_: &Foo, args: (i64, i64), reply: &mut i64| {
//!             *reply = args.0 + args.1;
//!             Ok(())
//!         })
//!         .build()?,
//! )?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! server.accept(listener).await?;
//! ```

mod conn;
mod registry;
mod service;

pub use registry::ServiceRegistry;
pub use service::{
    BoxFuture, HandlerError, HandlerResult, MethodType, Service, ServiceBuilder,
};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::control::DEFAULT_CONNECT_TIMEOUT;
use crate::error::Result;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::WriterConfig;
use conn::ConnConfig;

/// Default maximum concurrent handlers per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Builder for configuring a [`Server`].
pub struct ServerBuilder {
    writer_config: WriterConfig,
    max_concurrent_handlers: usize,
    max_frame_size: u32,
    handshake_timeout: Duration,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            writer_config: WriterConfig::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the maximum number of handlers running at once on one connection.
    ///
    /// When this limit is reached, the connection stops reading requests
    /// until a handler finishes.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Set the response writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the largest accepted header + body size.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set how long a new connection may take to send its handshake line.
    ///
    /// Zero means unbounded.
    /// Default: 10 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            registry: Arc::new(ServiceRegistry::new()),
            config: ConnConfig {
                max_concurrent_handlers: self.max_concurrent_handlers,
                writer_config: self.writer_config,
                max_frame_size: self.max_frame_size,
                handshake_timeout: self.handshake_timeout,
            },
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An RPC server.
///
/// Cloning is cheap; clones share the same services.
#[derive(Clone)]
pub struct Server {
    registry: Arc<ServiceRegistry>,
    config: ConnConfig,
}

impl Server {
    /// Create a server with default limits.
    pub fn new() -> Self {
        ServerBuilder::new().build()
    }

    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Publish a service.
    pub fn register(&self, service: Service) -> Result<()> {
        self.registry.register(service)
    }

    /// Registered services.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Accept TCP connections until the listener fails, serving each on its own task.
    pub async fn accept(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(addr = %peer, error = %e, "set_nodelay failed");
            }
            tracing::debug!(addr = %peer, "accepted connection");
            tokio::spawn(self.serve_conn(stream));
        }
    }

    /// Accept Unix socket connections until the listener fails.
    #[cfg(unix)]
    pub async fn accept_unix(&self, listener: tokio::net::UnixListener) -> Result<()> {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            };
            tokio::spawn(self.serve_conn(stream));
        }
    }

    /// Serve one already-connected stream to completion.
    pub fn serve_conn<S>(&self, stream: S) -> impl std::future::Future<Output = ()> + Send + 'static
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        conn::serve_conn(Arc::clone(&self.registry), self.config.clone(), stream)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_SERVER: OnceLock<Server> = OnceLock::new();

/// The process-wide default server.
pub fn default_server() -> &'static Server {
    DEFAULT_SERVER.get_or_init(Server::new)
}

/// Publish a service on the default server.
pub fn register(service: Service) -> Result<()> {
    default_server().register(service)
}

/// Accept connections for the default server.
pub async fn accept(listener: TcpListener) -> Result<()> {
    default_server().accept(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;

    struct Foo;
    struct Echo;

    #[test]
    fn test_builder_defaults() {
        let builder = ServerBuilder::default();
        assert_eq!(builder.max_concurrent_handlers, DEFAULT_MAX_CONCURRENT_HANDLERS);
        assert_eq!(builder.writer_config.channel_capacity, 1024);
        assert_eq!(builder.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(builder.handshake_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_builder_chain() {
        let server = Server::builder()
            .max_concurrent_handlers(4)
            .channel_capacity(16)
            .max_frame_size(4096)
            .handshake_timeout(Duration::from_millis(500))
            .build();
        assert_eq!(server.config.max_concurrent_handlers, 4);
        assert_eq!(server.config.writer_config.channel_capacity, 16);
        assert_eq!(server.config.max_frame_size, 4096);
        assert_eq!(server.config.handshake_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_clones_share_services() {
        let server = Server::new();
        let clone = server.clone();
        server
            .register(Service::builder(Foo).build().unwrap())
            .unwrap();
        assert_eq!(clone.registry().len(), 1);
    }

    #[test]
    fn test_default_server_register() {
        register(Service::builder(Echo).build().unwrap()).unwrap();
        assert!(matches!(
            default_server().register(Service::builder(Echo).build().unwrap()),
            Err(RpcError::ServiceAlreadyDefined(_))
        ));
    }
}
