//! Echo - one server, one client, one session.
//!
//! This example demonstrates:
//! - Publishing a service with synchronous and asynchronous methods
//! - Issuing calls with `call` and with `go` + await
//! - A server-side handle timeout reported back to the caller
//!
//! # Running
//!
//! ```text
//! RUST_LOG=callwire=debug cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use callwire::{Client, Options, Server, Service};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo method.
#[derive(Serialize, Deserialize, Debug, Default)]
struct EchoOutput {
    echo: String,
}

struct Echo {
    prefix: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = Server::new();
    server.register(
        Service::builder(Echo {
            prefix: "echo: ".to_string(),
        })
        .method("Say", |echo: &Echo, input: EchoInput, reply: &mut EchoOutput| {
            reply.echo = format!("{}{}", echo.prefix, input.message);
            Ok(())
        })
        .method_async("Slow", |_echo: Arc<Echo>, millis: u64| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(millis)
        })
        .build()?,
    )?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    tokio::spawn(async move { server.accept(listener).await });

    let options = Options::default().with_handle_timeout(Duration::from_millis(100));
    let client = Client::dial(&addr, options).await?;

    let reply: EchoOutput = client
        .call(
            "Echo.Say",
            &EchoInput {
                message: "hello".to_string(),
            },
        )
        .await?;
    println!("{}", reply.echo);

    let calls = [
        client.go::<_, u64>("Echo.Slow", &10u64).await,
        client.go::<_, u64>("Echo.Slow", &500u64).await,
    ];
    for call in calls {
        let seq = call.seq();
        match call.await {
            Ok(millis) => println!("call {seq}: slept {millis}ms"),
            Err(e) => println!("call {seq}: {e}"),
        }
    }

    client.close().await?;
    Ok(())
}
