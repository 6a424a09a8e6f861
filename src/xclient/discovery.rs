//! Server discovery and selection.
//!
//! Directory operations return boxed futures: a registry-backed directory
//! fetches over the network, and that fetch must not block a runtime worker.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use rand::Rng;
use tokio::time::Instant;

use crate::error::{Result, RpcError};

/// How [`Discovery::get`] picks among the known servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectMode {
    /// Uniformly random index on every call.
    #[default]
    Random,
    /// Cursor advanced on every call, modulo the current list length.
    RoundRobin,
}

/// A directory of server addresses.
pub trait Discovery: Send + Sync {
    /// Re-fetch the list from its source, if it has one.
    fn refresh(&self) -> BoxFuture<'_, Result<()>>;

    /// Replace the whole list.
    fn update(&self, servers: Vec<String>) -> BoxFuture<'_, Result<()>>;

    /// Pick one address.
    fn get(&self, mode: SelectMode) -> BoxFuture<'_, Result<String>>;

    /// Copy of every known address.
    fn get_all(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

struct State {
    servers: Vec<String>,
    index: usize,
}

/// Discovery over a list maintained by hand (no external registry).
pub struct MultiServerDiscovery {
    state: Mutex<State>,
}

impl MultiServerDiscovery {
    /// Create a directory holding `servers`.
    ///
    /// The round-robin cursor starts at a random position so that many
    /// clients built at once do not all hit the first server.
    pub fn new(servers: Vec<String>) -> Self {
        let index = rand::rng().random_range(0..i32::MAX as usize - 1);
        Self {
            state: Mutex::new(State { servers, index }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, servers: Vec<String>) {
        self.lock().servers = servers;
    }

    fn select(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.lock();
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }

        match mode {
            SelectMode::Random => {
                let i = rand::rng().random_range(0..n);
                Ok(state.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                // The list may have shrunk since the cursor last moved.
                let server = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(server)
            }
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.lock().servers.clone()
    }
}

impl Discovery for MultiServerDiscovery {
    fn refresh(&self) -> BoxFuture<'_, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn update(&self, servers: Vec<String>) -> BoxFuture<'_, Result<()>> {
        self.replace(servers);
        future::ready(Ok(())).boxed()
    }

    fn get(&self, mode: SelectMode) -> BoxFuture<'_, Result<String>> {
        future::ready(self.select(mode)).boxed()
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        future::ready(Ok(self.snapshot())).boxed()
    }
}

impl fmt::Debug for MultiServerDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiServerDiscovery")
            .field("servers", &self.lock().servers)
            .finish()
    }
}

/// Default staleness window of a [`RegistryDiscovery`].
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

type FetchFn = Box<dyn Fn() -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync>;

/// Discovery backed by an external registry.
///
/// The list is re-fetched through `fetch` whenever it is older than the
/// staleness window; `get`/`get_all` refresh first. Concurrent refreshes
/// wait for the one in flight instead of fetching again.
pub struct RegistryDiscovery {
    servers: MultiServerDiscovery,
    fetch: FetchFn,
    timeout: Duration,
    last_update: tokio::sync::Mutex<Option<Instant>>,
}

impl RegistryDiscovery {
    /// Create a directory that fetches its list with `fetch`.
    ///
    /// A zero `timeout` selects [`DEFAULT_UPDATE_TIMEOUT`].
    pub fn new<F, Fut>(fetch: F, timeout: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
    {
        let timeout = if timeout.is_zero() {
            DEFAULT_UPDATE_TIMEOUT
        } else {
            timeout
        };
        Self {
            servers: MultiServerDiscovery::new(Vec::new()),
            fetch: Box::new(move || fetch().boxed()),
            timeout,
            last_update: tokio::sync::Mutex::new(None),
        }
    }
}

impl RegistryDiscovery {
    async fn refresh_if_stale(&self) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        if last_update.is_some_and(|at| at.elapsed() < self.timeout) {
            return Ok(());
        }

        let servers = (self.fetch)().await.inspect_err(|e| {
            tracing::warn!(error = %e, "refresh from registry failed");
        })?;
        tracing::debug!(count = servers.len(), "refreshed servers from registry");

        self.servers.replace(servers);
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn replace(&self, servers: Vec<String>) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        self.servers.replace(servers);
        *last_update = Some(Instant::now());
        Ok(())
    }

    async fn select(&self, mode: SelectMode) -> Result<String> {
        self.refresh_if_stale().await?;
        self.servers.select(mode)
    }

    async fn snapshot(&self) -> Result<Vec<String>> {
        self.refresh_if_stale().await?;
        Ok(self.servers.snapshot())
    }
}

impl Discovery for RegistryDiscovery {
    fn refresh(&self) -> BoxFuture<'_, Result<()>> {
        self.refresh_if_stale().boxed()
    }

    fn update(&self, servers: Vec<String>) -> BoxFuture<'_, Result<()>> {
        self.replace(servers).boxed()
    }

    fn get(&self, mode: SelectMode) -> BoxFuture<'_, Result<String>> {
        self.select(mode).boxed()
    }

    fn get_all(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.snapshot().boxed()
    }
}
