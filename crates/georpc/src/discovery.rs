use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::RpcError;

/// How a [`Discovery`] picks one server among several eligible ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    Random,
    RoundRobin,
}

/// A source of server addresses, refreshed on demand.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Forces a refresh from the backing source.
    async fn refresh(&self) -> Result<(), RpcError>;
    /// Replaces the server list directly (used by tests and by callers that
    /// already know the current membership).
    async fn update(&self, servers: Vec<String>) -> Result<(), RpcError>;
    /// Picks one address per `mode`.
    async fn get(&self, mode: SelectMode) -> Result<String, RpcError>;
    /// Returns every known address, for [`crate::xclient::XClient::broadcast`].
    async fn get_all(&self) -> Result<Vec<String>, RpcError>;
}

/// A fixed, explicitly-managed server list — no backing registry to poll.
pub struct MultiServersDiscovery {
    servers: AsyncMutex<Vec<String>>,
    round_robin: AtomicUsize,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        // Seed the round-robin cursor randomly so every freshly constructed
        // client doesn't start at server 0.
        let start = if servers.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..servers.len())
        };
        Self {
            servers: AsyncMutex::new(servers),
            round_robin: AtomicUsize::new(start),
        }
    }
}

#[async_trait]
impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<(), RpcError> {
        // Static list: nothing to refresh from.
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<(), RpcError> {
        *self.servers.lock().await = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String, RpcError> {
        let servers = self.servers.lock().await;
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }
        let index = match mode {
            SelectMode::Random => rand::thread_rng().gen_range(0..servers.len()),
            SelectMode::RoundRobin => self.round_robin.fetch_add(1, Ordering::SeqCst) % servers.len(),
        };
        Ok(servers[index].clone())
    }

    async fn get_all(&self) -> Result<Vec<String>, RpcError> {
        Ok(self.servers.lock().await.clone())
    }
}

type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<String>, RpcError>> + Send>>;
type FetchFn = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// A server list backed by an external registry, re-pulled at most once per
/// `update_interval`.
///
/// Shaped after a named-registry-of-backends manager that looks up
/// availability lazily rather than eagerly polling in a background task.
/// `fetch` is injected rather than hard-coded to an HTTP client, since the
/// registry's transport is as out-of-scope for this crate as the TCP
/// listener/dialer are.
pub struct RegistryDiscovery {
    fetch: FetchFn,
    inner: MultiServersDiscovery,
    update_interval: Duration,
    last_refresh: AsyncMutex<Option<Instant>>,
}

impl RegistryDiscovery {
    pub fn new<F, Fut>(fetch: F, update_interval: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>, RpcError>> + Send + 'static,
    {
        Self {
            fetch: Arc::new(move || Box::pin(fetch()) as FetchFuture),
            inner: MultiServersDiscovery::new(Vec::new()),
            update_interval,
            last_refresh: AsyncMutex::new(None),
        }
    }

    async fn refresh_if_stale(&self) -> Result<(), RpcError> {
        let stale = match *self.last_refresh.lock().await {
            None => true,
            Some(last) => last.elapsed() > self.update_interval,
        };
        if stale {
            self.refresh().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<(), RpcError> {
        let servers = (self.fetch)().await?;
        self.inner.update(servers).await?;
        *self.last_refresh.lock().await = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<(), RpcError> {
        self.inner.update(servers).await?;
        *self.last_refresh.lock().await = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String, RpcError> {
        self.refresh_if_stale().await?;
        self.inner.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>, RpcError> {
        self.refresh_if_stale().await?;
        self.inner.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_cycles_through_every_server() {
        let discovery = MultiServersDiscovery::new(vec!["a".into(), "b".into()]);
        let first = discovery.get(SelectMode::RoundRobin).await.unwrap();
        let second = discovery.get(SelectMode::RoundRobin).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn empty_list_reports_no_available_servers() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        let err = discovery.get(SelectMode::Random).await.unwrap_err();
        assert!(matches!(err, RpcError::NoAvailableServers));
    }

    #[tokio::test]
    async fn registry_discovery_fetches_on_first_use() {
        let discovery = RegistryDiscovery::new(
            || async { Ok(vec!["tcp@127.0.0.1:9000".to_string()]) },
            Duration::from_secs(60),
        );
        let servers = discovery.get_all().await.unwrap();
        assert_eq!(servers, vec!["tcp@127.0.0.1:9000".to_string()]);
    }
}
