//! Integration tests for callwire.
//!
//! These tests run real servers on loopback TCP and drive them through the
//! public client API.

use std::sync::Arc;
use std::time::Duration;

use callwire::{
    Client, CodecType, Discovery, MultiServerDiscovery, Options, RegistryDiscovery, RpcError,
    SelectMode, Server, Service, XClient,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Serialize, Deserialize)]
struct Args {
    num1: i64,
    num2: i64,
}

struct Foo;

/// Receiver that remembers which server it belongs to.
struct Node {
    id: u32,
}

fn foo_service() -> Service {
    Service::builder(Foo)
        .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
            *reply = args.num1 + args.num2;
            Ok(())
        })
        .method("Fail", |_: &Foo, _: Args, _: &mut i64| {
            Err("division by zero".into())
        })
        .method_async("Sleep", |_foo: Arc<Foo>, millis: u64| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(millis)
        })
        .build()
        .unwrap()
}

async fn start(server: Server) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move { server.accept(listener).await });
    addr
}

async fn start_foo() -> (Server, String) {
    let server = Server::new();
    server.register(foo_service()).unwrap();
    let addr = start(server.clone()).await;
    (server, addr)
}

async fn start_node(id: u32) -> String {
    let server = Server::new();
    server
        .register(
            Service::builder(Node { id })
                .method("Id", |node: &Node, _: (), reply: &mut u32| {
                    *reply = node.id;
                    Ok(())
                })
                .build()
                .unwrap(),
        )
        .unwrap();
    start(server).await
}

/// One call end to end, and the invocation counter moves.
#[tokio::test]
async fn test_sum_end_to_end() {
    let (server, addr) = start_foo().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let sum: i64 = client.call("Foo.Sum", &Args { num1: 1, num2: 3 }).await.unwrap();
    assert_eq!(sum, 4);

    let (_, method) = server.registry().find_service("Foo.Sum").unwrap();
    assert_eq!(method.num_calls(), 1);
}

/// The JSON codec works the same as the default.
#[tokio::test]
async fn test_sum_with_json_codec() {
    let (_server, addr) = start_foo().await;
    let options = Options::default().with_codec(CodecType::Json);
    let client = Client::dial(&format!("tcp@{addr}"), options).await.unwrap();

    let sum: i64 = client.call("Foo.Sum", &Args { num1: 20, num2: 22 }).await.unwrap();
    assert_eq!(sum, 42);
}

/// Many concurrent calls on one session each get their own reply.
#[tokio::test]
async fn test_concurrent_calls() {
    let (_server, addr) = start_foo().await;
    let client = Arc::new(Client::dial(&addr, Options::default()).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..50i64 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let sum: i64 = client.call("Foo.Sum", &Args { num1: i, num2: i }).await.unwrap();
            (i, sum)
        }));
    }

    for task in tasks {
        let (i, sum) = task.await.unwrap();
        assert_eq!(sum, 2 * i);
    }
    assert_eq!(client.pending_calls(), 0);
}

/// Dispatch failures are per call; the session survives them.
#[tokio::test]
async fn test_dispatch_errors_keep_session() {
    let (_server, addr) = start_foo().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let err = client
        .call::<_, i64>("Bar.Sum", &Args { num1: 1, num2: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg.contains("can't find service Bar")));

    let err = client
        .call::<_, i64>("Foo.Product", &Args { num1: 1, num2: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg.contains("can't find method Product")));

    let err = client
        .call::<_, i64>("Foo.Fail", &Args { num1: 1, num2: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "division by zero"));

    let sum: i64 = client.call("Foo.Sum", &Args { num1: 2, num2: 3 }).await.unwrap();
    assert_eq!(sum, 5);
}

/// A slow method gets one timeout response; later calls are unaffected.
#[tokio::test]
async fn test_handle_timeout() {
    let (_server, addr) = start_foo().await;
    let options = Options::default().with_handle_timeout(Duration::from_millis(50));
    let client = Client::dial(&addr, options).await.unwrap();

    let err = client.call::<_, u64>("Foo.Sleep", &500u64).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg.contains("request handle timeout")));

    let fast: u64 = client.call("Foo.Sleep", &1u64).await.unwrap();
    assert_eq!(fast, 1);
}

/// The client gives up on its own budget and drops the late reply.
#[tokio::test]
async fn test_client_call_timeout() {
    let (_server, addr) = start_foo().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let result: callwire::Result<u64> = client
        .call_timeout("Foo.Sleep", &200u64, Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(RpcError::CallTimeout(_))));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let sum: i64 = client.call("Foo.Sum", &Args { num1: 1, num2: 1 }).await.unwrap();
    assert_eq!(sum, 2);
}

/// A handshake with the wrong magic number closes the connection silently.
#[tokio::test]
async fn test_bad_handshake_closes_connection() {
    let (_server, addr) = start_foo().await;
    let mut stream = TcpStream::connect(&addr).await.unwrap();

    stream
        .write_all(b"{\"magicNumber\":1,\"codecType\":\"application/msgpack\",\"connectTimeout\":0,\"handleTimeout\":0}\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    let read = stream.read_to_end(&mut buf).await.unwrap();
    assert_eq!(read, 0);
}

/// Closing a session fails pending calls and rejects new ones.
#[tokio::test]
async fn test_close_session() {
    let (_server, addr) = start_foo().await;
    let client = Client::dial(&addr, Options::default()).await.unwrap();

    let pending = client.go::<_, u64>("Foo.Sleep", &200u64).await;
    client.close().await.unwrap();

    assert!(matches!(pending.await, Err(RpcError::Terminated(_))));
    assert!(!client.is_available());
    assert!(matches!(client.close().await, Err(RpcError::Shutdown)));

    let late: callwire::Result<i64> = client.call("Foo.Sum", &Args { num1: 1, num2: 1 }).await;
    assert!(matches!(late, Err(RpcError::Shutdown)));
}

/// Connecting to nothing fails promptly.
#[tokio::test]
async fn test_dial_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let options = Options::default().with_connect_timeout(Duration::from_secs(1));
    assert!(Client::dial(&addr, options).await.is_err());
}

/// Round-robin visits every server in turn.
#[tokio::test]
async fn test_xclient_round_robin() {
    let mut servers = Vec::new();
    for id in 1..=3 {
        servers.push(format!("tcp@{}", start_node(id).await));
    }

    let discovery = Arc::new(MultiServerDiscovery::new(servers));
    let xc = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(xc.call::<_, u32>("Node.Id", &()).await.unwrap());
    }

    let mut first_round = ids[..3].to_vec();
    first_round.sort_unstable();
    assert_eq!(first_round, vec![1, 2, 3]);
    assert_eq!(ids[..3], ids[3..]);

    xc.close().await.unwrap();
}

/// A registry-backed directory fetches asynchronously before the first call.
#[tokio::test]
async fn test_xclient_registry_discovery() {
    let addr = start_node(7).await;

    let discovery = RegistryDiscovery::new(
        move || {
            let addr = addr.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(vec![format!("tcp@{addr}")])
            }
        },
        Duration::from_secs(60),
    );
    let xc = XClient::new(Arc::new(discovery), SelectMode::Random, Options::default());

    let id: u32 = xc.call("Node.Id", &()).await.unwrap();
    assert_eq!(id, 7);
    xc.close().await.unwrap();
}

/// Broadcast reaches every server and reports the first failure.
#[tokio::test]
async fn test_xclient_broadcast() {
    let (foo_a, addr_a) = start_foo().await;
    let (foo_b, addr_b) = start_foo().await;

    let discovery = Arc::new(MultiServerDiscovery::new(vec![addr_a, addr_b]));
    let xc = XClient::new(discovery.clone(), SelectMode::Random, Options::default());

    let sum: i64 = xc.broadcast("Foo.Sum", &Args { num1: 3, num2: 4 }).await.unwrap();
    assert_eq!(sum, 7);
    for server in [&foo_a, &foo_b] {
        let (_, method) = server.registry().find_service("Foo.Sum").unwrap();
        assert_eq!(method.num_calls(), 1);
    }

    let err = xc
        .broadcast::<_, i64>("Foo.Fail", &Args { num1: 1, num2: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "division by zero"));

    discovery.update(Vec::new()).await.unwrap();
    let empty: callwire::Result<i64> = xc.broadcast("Foo.Sum", &Args { num1: 1, num2: 1 }).await;
    assert!(matches!(empty, Err(RpcError::NoAvailableServers)));

    xc.close().await.unwrap();
}
