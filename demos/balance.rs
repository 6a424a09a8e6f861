//! Balance - one discovery-backed client over several servers.
//!
//! This example demonstrates:
//! - Starting a few servers that publish the same service
//! - Round-robin calls through `XClient`
//! - Broadcasting one call to every server
//!
//! # Running
//!
//! ```text
//! RUST_LOG=callwire=debug cargo run --example balance
//! ```

use std::sync::Arc;

use callwire::{MultiServerDiscovery, Options, SelectMode, Server, Service, XClient};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Serialize, Deserialize, Debug)]
struct Args {
    num1: i64,
    num2: i64,
}

struct Foo {
    port: u16,
}

async fn start_server() -> Result<String, Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = Server::new();
    server.register(
        Service::builder(Foo { port: addr.port() })
            .method("Sum", |foo: &Foo, args: Args, reply: &mut i64| {
                tracing::info!(port = foo.port, "Foo.Sum");
                *reply = args.num1 + args.num2;
                Ok(())
            })
            .build()?,
    )?;
    tokio::spawn(async move { server.accept(listener).await });

    Ok(format!("tcp@{addr}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut servers = Vec::new();
    for _ in 0..3 {
        servers.push(start_server().await?);
    }
    println!("servers: {servers:?}");

    let discovery = Arc::new(MultiServerDiscovery::new(servers));
    let xc = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    for i in 0..5 {
        let sum: i64 = xc.call("Foo.Sum", &Args { num1: i, num2: i * i }).await?;
        println!("call: {i} + {} = {sum}", i * i);
    }

    let sum: i64 = xc.broadcast("Foo.Sum", &Args { num1: 7, num2: 8 }).await?;
    println!("broadcast: 7 + 8 = {sum}");

    xc.close().await?;
    Ok(())
}
