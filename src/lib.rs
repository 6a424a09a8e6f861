//! # callwire
//!
//! A remote-procedure-call engine over any byte stream.
//!
//! A [`Client`] multiplexes many outstanding calls over one connection, a
//! [`Server`] dispatches each incoming call to a registered [`Service`]
//! method, and an [`XClient`] picks among several server addresses through a
//! [`Discovery`] directory.
//!
//! ## Architecture
//!
//! - **Handshake**: one JSON line ([`Options`]) fixes the codec and timeout
//!   budgets for the life of the connection
//! - **Frames**: after the handshake, `Header` + body pairs encoded with the
//!   negotiated codec, each behind an 8-byte length prefix
//!
//! ## Example
//!
//! ```ignore
//! use callwire::{Client, Options, Server, Service};
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Args { num1: i64, num2: i64 }
//!
//! struct Foo;
//!
//! #[tokio::main]
//! async fn main() -> callwire::Result<()> {
//!     let server = Server::new();
//!     server.register(
//!         Service::builder(Foo)
//!             .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
//!                 *reply = args.num1 + args.num2;
//!                 Ok(())
//!             })
//!             .build()?,
//!     )?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?.to_string();
//!     tokio::spawn(async move { server.accept(listener).await });
//!
//!     let client = Client::dial(&addr, Options::default()).await?;
//!     let sum: i64 = client.call("Foo.Sum", &Args { num1: 1, num2: 3 }).await?;
//!     assert_eq!(sum, 4);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod control;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod xclient;

mod writer;

pub use client::{Call, Client};
pub use codec::CodecType;
pub use control::{Options, MAGIC_NUMBER};
pub use error::{Result, RpcError};
pub use server::{
    accept, default_server, register, HandlerError, HandlerResult, Server, ServerBuilder,
    Service, ServiceBuilder,
};
pub use xclient::{Discovery, MultiServerDiscovery, RegistryDiscovery, SelectMode, XClient};
