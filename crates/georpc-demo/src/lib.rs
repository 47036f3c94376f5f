//! TCP plumbing for the `georpc` core crate.
//!
//! The core crate (`georpc`) never opens a socket itself — it only knows
//! [`georpc::AsyncDuplex`]. This crate supplies the two adapters a real
//! deployment needs: [`TcpListener`] (for [`georpc::Server::accept`]) and
//! [`TcpDialer`] (for [`georpc::XClient`]).

use std::net::SocketAddr;

use async_trait::async_trait;
use georpc::{AsyncDuplex, RpcError};
use tokio::net::TcpStream;

/// Adapts `tokio::net::TcpListener` to [`georpc::Listener`].
pub struct TcpListener(tokio::net::TcpListener);

impl TcpListener {
    pub async fn bind(addr: impl Into<SocketAddr>) -> std::io::Result<(Self, SocketAddr)> {
        let listener = tokio::net::TcpListener::bind(addr.into()).await?;
        let local_addr = listener.local_addr()?;
        Ok((Self(listener), local_addr))
    }
}

#[async_trait]
impl georpc::Listener for TcpListener {
    type Conn = TcpStream;

    async fn accept(&mut self) -> std::io::Result<Self::Conn> {
        let (stream, _peer) = self.0.accept().await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Adapts `tokio::net::TcpStream` to [`georpc::Dialer`]: `address` is a plain
/// `host:port` string, already stripped of its `protocol@` prefix by
/// [`georpc::XClient`].
pub struct TcpDialer;

#[async_trait]
impl georpc::Dialer for TcpDialer {
    async fn dial(&self, address: &str) -> Result<Box<dyn AsyncDuplex>, RpcError> {
        let stream = TcpStream::connect(address).await.map_err(RpcError::from)?;
        stream.set_nodelay(true).map_err(RpcError::from)?;
        Ok(Box::new(stream))
    }
}

/// The service this demo exposes: `Arith.Sum` (plain arithmetic) and
/// `Arith.Sleep` (a slow handler, useful for exercising a tight handle
/// timeout).
pub fn build_arith_service() -> georpc::Service {
    #[derive(serde::Deserialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }
    #[derive(serde::Serialize)]
    struct SumReply {
        c: i64,
    }
    #[derive(serde::Deserialize)]
    struct SleepArgs {
        millis: u64,
    }

    georpc::ServiceBuilder::new("Arith")
        .method("Sum", |args: SumArgs| async move {
            Ok::<_, RpcError>(SumReply { c: args.a + args.b })
        })
        .method("Sleep", |args: SleepArgs| async move {
            tokio::time::sleep(std::time::Duration::from_millis(args.millis)).await;
            Ok::<_, RpcError>(())
        })
        .build()
        .expect("\"Arith\" is a valid service name")
}
