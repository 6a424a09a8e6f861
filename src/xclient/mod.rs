//! Discovery-backed client.
//!
//! An [`XClient`] asks a [`Discovery`] directory for an address per call,
//! keeps one [`Client`] session per address, and can fan one call out to
//! every known server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use callwire::{MultiServerDiscovery, Options, SelectMode, XClient};
//!
//! let discovery = MultiServerDiscovery::new(vec![
//!     "tcp@127.0.0.1:9001".to_string(),
//!     "tcp@127.0.0.1:9002".to_string(),
//! ]);
//! let xc = XClient::new(Arc::new(discovery), SelectMode::RoundRobin, Options::default());
//!
//! let sum: i64 = xc.call("Foo.Sum", &(1, 2)).await?;
//! let any: i64 = xc.broadcast("Foo.Sum", &(3, 4)).await?;
//! xc.close().await?;
//! ```

mod discovery;

pub use discovery::{
    Discovery, MultiServerDiscovery, RegistryDiscovery, SelectMode, DEFAULT_UPDATE_TIMEOUT,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::client::Client;
use crate::control::Options;
use crate::error::{Result, RpcError};

/// Client that load-balances across the servers of a [`Discovery`].
pub struct XClient {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    options: Options,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl XClient {
    /// Create a client selecting servers from `discovery` with `mode`.
    pub fn new(discovery: Arc<dyn Discovery>, mode: SelectMode, options: Options) -> Self {
        Self {
            discovery,
            mode,
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The directory this client selects from.
    pub fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    /// Cached session for `address`, dialing a new one if needed.
    ///
    /// A cached session that is no longer available is closed and replaced.
    async fn dial(&self, address: &str) -> Result<Arc<Client>> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(address) {
            if client.is_available() {
                return Ok(Arc::clone(client));
            }
            tracing::debug!(addr = address, "replacing unavailable session");
            if let Some(stale) = clients.remove(address) {
                let _ = stale.close().await;
            }
        }

        let client = Arc::new(Client::dial(address, self.options.clone()).await?);
        clients.insert(address.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Call `service_method` on one server chosen by the select mode.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let address = self.discovery.get(self.mode).await?;
        let client = self.dial(&address).await?;
        client.call(service_method, args).await
    }

    /// Like [`call`](Self::call), bounded by `budget` once the session is up.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        budget: Duration,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let address = self.discovery.get(self.mode).await?;
        let client = self.dial(&address).await?;
        client.call_timeout(service_method, args, budget).await
    }

    /// Call `service_method` on every known server.
    ///
    /// Returns the first error (abandoning the remaining waits) or else one
    /// of the successful replies. Fails with [`RpcError::NoAvailableServers`]
    /// when the directory is empty.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let servers = self.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }

        let mut calls = FuturesUnordered::new();
        for address in &servers {
            let client = self.dial(address).await?;
            calls.push(client.go::<A, R>(service_method, args).await);
        }

        let mut reply = None;
        while let Some(result) = calls.next().await {
            match result {
                Ok(value) => {
                    if reply.is_none() {
                        reply = Some(value);
                    }
                }
                Err(e) => {
                    tracing::debug!(service_method, error = %e, "broadcast failed");
                    return Err(e);
                }
            }
        }

        reply.ok_or(RpcError::NoAvailableServers)
    }

    /// Close every cached session.
    pub async fn close(&self) -> Result<()> {
        let mut clients = self.clients.lock().await;
        for (address, client) in clients.drain() {
            if let Err(e) = client.close().await {
                tracing::debug!(addr = %address, error = %e, "close session failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_without_servers() {
        let xc = XClient::new(
            Arc::new(MultiServerDiscovery::new(Vec::new())),
            SelectMode::RoundRobin,
            Options::default(),
        );

        let call: Result<i64> = xc.call("Foo.Sum", &(1, 2)).await;
        assert!(matches!(call, Err(RpcError::NoAvailableServers)));

        let broadcast: Result<i64> = xc.broadcast("Foo.Sum", &(1, 2)).await;
        assert!(matches!(broadcast, Err(RpcError::NoAvailableServers)));
    }

    #[tokio::test]
    async fn test_call_bad_address() {
        let xc = XClient::new(
            Arc::new(MultiServerDiscovery::new(vec!["udp@127.0.0.1:1".to_string()])),
            SelectMode::Random,
            Options::default(),
        );

        let call: Result<i64> = xc.call("Foo.Sum", &(1, 2)).await;
        assert!(matches!(call, Err(RpcError::InvalidAddress(_))));
        xc.close().await.unwrap();
    }
}
