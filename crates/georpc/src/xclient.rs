use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

use crate::client::Client;
use crate::codec::AsyncDuplex;
use crate::discovery::{Discovery, SelectMode};
use crate::error::RpcError;
use crate::option::ConnectOptions;

/// Opens the raw duplex stream behind a discovered address.
///
/// `rpc_addr` here is the address *without* its `protocol@` prefix —
/// [`XClient`] strips that off before dialing and uses it to decide between
/// [`Client::dial`] and [`Client::dial_http`]. Actually opening a socket is
/// TCP plumbing, out of scope for this crate; `georpc-demo` supplies a
/// `tokio::net::TcpStream`-backed implementation.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Box<dyn AsyncDuplex>, RpcError>;
}

/// A discovery-backed client: picks a server per call, caches one
/// [`Client`] per address, and can fan a call out to every known server.
pub struct XClient {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    opt: ConnectOptions,
    dialer: Arc<dyn Dialer>,
    clients: AsyncMutex<HashMap<String, Arc<Client>>>,
}

impl XClient {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        mode: SelectMode,
        opt: ConnectOptions,
        dialer: Arc<dyn Dialer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            discovery,
            mode,
            opt,
            dialer,
            clients: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Closes and drops every cached [`Client`].
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }

    /// Returns a cached, still-available client for `rpc_addr`, dialing and
    /// completing the handshake if none exists yet.
    async fn dial(&self, rpc_addr: &str) -> Result<Arc<Client>, RpcError> {
        {
            let mut clients = self.clients.lock().await;
            if let Some(client) = clients.get(rpc_addr) {
                if client.is_available() {
                    return Ok(client.clone());
                }
                clients.remove(rpc_addr);
            }
        }

        let (protocol, address) = rpc_addr
            .split_once('@')
            .ok_or_else(|| RpcError::BadAddress(rpc_addr.to_string()))?;

        let connect = async {
            let stream = self.dialer.dial(address).await?;
            if protocol == "http" {
                Client::dial_http(stream, self.opt.clone()).await
            } else {
                Client::dial(stream, self.opt.clone()).await
            }
        };
        let connect_timeout = self.opt.connect_timeout;
        let client = if connect_timeout.is_zero() {
            connect.await?
        } else {
            tokio::time::timeout(connect_timeout, connect)
                .await
                .map_err(|_| RpcError::ConnectTimeout(connect_timeout))??
        };

        let mut clients = self.clients.lock().await;
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    /// Picks one server via the configured [`SelectMode`] and calls it.
    pub async fn call<Args, Reply>(self: &Arc<Self>, service_method: &str, args: &Args) -> Result<Reply, RpcError>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let addr = self.discovery.get(self.mode).await?;
        let client = self.dial(&addr).await?;
        client.call(service_method, args).await
    }

    /// Calls every known server and waits for all of them to finish. Returns
    /// an error if *any* backend failed — even if others succeeded — and
    /// only returns a successful reply once every backend has reported in
    /// without error. The remaining tasks are aborted as soon as the first
    /// failure is observed, but `broadcast` itself still waits for all of
    /// them to drain before returning.
    pub async fn broadcast<Args, Reply>(
        self: &Arc<Self>,
        service_method: &str,
        args: &Args,
    ) -> Result<Reply, RpcError>
    where
        Args: Serialize,
        Reply: DeserializeOwned + Send + 'static,
    {
        let servers = self.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }
        let body = serde_json::to_vec(args).map_err(|e| RpcError::Encode(e.to_string()))?;

        let mut tasks = JoinSet::new();
        for addr in servers {
            let this = self.clone();
            let body = body.clone();
            let service_method = service_method.to_string();
            tasks.spawn(async move {
                let client = this.dial(&addr).await?;
                client.call_raw(&service_method, body).await
            });
        }

        let mut first_err: Option<RpcError> = None;
        let mut first_success: Option<Vec<u8>> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(reply_bytes)) => {
                    first_success.get_or_insert(reply_bytes);
                }
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                        tasks.abort_all();
                    }
                }
                Err(join_err) => {
                    if !join_err.is_cancelled() && first_err.is_none() {
                        first_err = Some(RpcError::Cancelled("broadcast task panicked".to_string()));
                        tasks.abort_all();
                    }
                }
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }
        let reply_bytes = first_success.ok_or(RpcError::NoAvailableServers)?;
        serde_json::from_slice(&reply_bytes).map_err(|e| RpcError::DecodeBody(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MultiServersDiscovery;
    use crate::server::Server;
    use crate::service::Service;

    struct InMemoryDialer {
        server: Arc<Server>,
    }

    #[async_trait]
    impl Dialer for InMemoryDialer {
        async fn dial(&self, _address: &str) -> Result<Box<dyn AsyncDuplex>, RpcError> {
            let (client_stream, server_stream) = tokio::io::duplex(8192);
            let server = self.server.clone();
            tokio::spawn(async move { server.serve_conn(server_stream).await });
            Ok(Box::new(client_stream))
        }
    }

    /// Dials normally, except for one address it always fails — used to
    /// simulate one backend being down among several healthy ones.
    struct FlakyDialer {
        inner: InMemoryDialer,
        broken_address: &'static str,
    }

    #[async_trait]
    impl Dialer for FlakyDialer {
        async fn dial(&self, address: &str) -> Result<Box<dyn AsyncDuplex>, RpcError> {
            if address == self.broken_address {
                return Err(RpcError::Transport("connection refused".to_string()));
            }
            self.inner.dial(address).await
        }
    }

    fn arith_server() -> Arc<Server> {
        let server = Server::new();
        server
            .register(
                Service::builder("Arith")
                    .method("Sum", |args: serde_json::Value| async move {
                        let a = args["a"].as_i64().unwrap_or_default();
                        let b = args["b"].as_i64().unwrap_or_default();
                        Ok::<_, RpcError>(serde_json::json!({"c": a + b}))
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        server
    }

    #[tokio::test]
    async fn call_picks_a_discovered_server_and_completes() {
        let dialer: Arc<dyn Dialer> = Arc::new(InMemoryDialer { server: arith_server() });
        let discovery: Arc<dyn Discovery> =
            Arc::new(MultiServersDiscovery::new(vec!["tcp@anything:0".to_string()]));
        let xclient = XClient::new(discovery, SelectMode::RoundRobin, ConnectOptions::default(), dialer);

        let reply: serde_json::Value = xclient
            .call("Arith.Sum", &serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        assert_eq!(reply["c"], 3);
    }

    #[tokio::test]
    async fn broadcast_returns_first_success_across_all_servers() {
        let dialer: Arc<dyn Dialer> = Arc::new(InMemoryDialer { server: arith_server() });
        let discovery: Arc<dyn Discovery> = Arc::new(MultiServersDiscovery::new(vec![
            "tcp@one:0".to_string(),
            "tcp@two:0".to_string(),
            "tcp@three:0".to_string(),
        ]));
        let xclient = XClient::new(discovery, SelectMode::Random, ConnectOptions::default(), dialer);

        let reply: serde_json::Value = xclient
            .broadcast("Arith.Sum", &serde_json::json!({"a": 4, "b": 5}))
            .await
            .unwrap();
        assert_eq!(reply["c"], 9);
    }

    #[tokio::test]
    async fn broadcast_fails_if_any_server_fails_even_if_others_succeed() {
        let dialer: Arc<dyn Dialer> = Arc::new(FlakyDialer {
            inner: InMemoryDialer { server: arith_server() },
            broken_address: "two:0",
        });
        let discovery: Arc<dyn Discovery> = Arc::new(MultiServersDiscovery::new(vec![
            "tcp@one:0".to_string(),
            "tcp@two:0".to_string(),
            "tcp@three:0".to_string(),
        ]));
        let xclient = XClient::new(discovery, SelectMode::Random, ConnectOptions::default(), dialer);

        let result: Result<serde_json::Value, RpcError> =
            xclient.broadcast("Arith.Sum", &serde_json::json!({"a": 40, "b": 2})).await;
        assert!(result.is_err(), "expected an error, two healthy backends should not mask one failure");
    }
}
