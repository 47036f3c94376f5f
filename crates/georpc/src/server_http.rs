use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::codec::AsyncDuplex;
use crate::error::RpcError;
use crate::framing::read_line;
use crate::server::{Server, CONNECTED_STATUS, DEFAULT_RPC_PATH};

impl Server {
    /// Upgrades an HTTP `CONNECT <path>` request on `stream` to a connection
    /// handled exactly like a plain one, then hijacks the socket. Any other
    /// request gets `405 Method Not Allowed`. `path` defaults to
    /// [`DEFAULT_RPC_PATH`] in `georpc-demo`.
    pub async fn serve_http<S: AsyncDuplex + 'static>(self: &Arc<Self>, stream: S, path: &str) {
        let mut boxed: Box<dyn AsyncDuplex> = Box::new(stream);
        match read_request_line(&mut boxed).await {
            Ok(line) if is_connect_to(&line, path) => {
                if let Err(err) = drain_headers(&mut boxed).await {
                    warn!(%err, "rpc server: malformed HTTP CONNECT request");
                    return;
                }
                let status_line = format!("{CONNECTED_STATUS}\n\n");
                if let Err(err) = boxed.write_all(status_line.as_bytes()).await {
                    warn!(%err, "rpc server: failed to write CONNECT response");
                    return;
                }
                self.serve_boxed_conn(boxed).await;
            }
            Ok(_) => {
                let _ = boxed
                    .write_all(b"HTTP/1.0 405 Method Not Allowed\n\n")
                    .await;
            }
            Err(err) => {
                warn!(%err, "rpc server: failed to read HTTP request line");
            }
        }
    }
}

fn is_connect_to(request_line: &str, path: &str) -> bool {
    let mut parts = request_line.split_whitespace();
    matches!((parts.next(), parts.next()), (Some("CONNECT"), Some(p)) if p == path)
}

async fn read_request_line(stream: &mut Box<dyn AsyncDuplex>) -> Result<String, RpcError> {
    let line = read_line(stream).await.map_err(RpcError::from)?;
    if line.is_empty() {
        return Err(RpcError::Eof);
    }
    String::from_utf8(line)
        .map(|s| s.trim_end().to_string())
        .map_err(|e| RpcError::Handshake(e.to_string()))
}

/// Reads and discards HTTP headers up to the blank line terminating them.
async fn drain_headers(stream: &mut Box<dyn AsyncDuplex>) -> Result<(), RpcError> {
    loop {
        let line = read_line(stream).await.map_err(RpcError::from)?;
        if line.is_empty() || line == b"\r\n" || line == b"\n" {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::ConnectOptions;
    use crate::service::Service;

    #[tokio::test]
    async fn connect_upgrade_then_serves_an_rpc_call() {
        let server = Server::new();
        server
            .register(
                Service::builder("Echo")
                    .method("Ping", |()| async move { Ok::<_, RpcError>(()) })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let (mut client, conn) = tokio::io::duplex(8192);
        let server_task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve_http(conn, DEFAULT_RPC_PATH).await })
        };

        client
            .write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\n\n").as_bytes())
            .await
            .unwrap();

        let mut status = [0u8; CONNECTED_STATUS.len() + 2];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut status)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&status).starts_with(CONNECTED_STATUS));

        crate::option::write_handshake(&mut client, &ConnectOptions::default())
            .await
            .unwrap();

        drop(client);
        let _ = server_task.await;
    }
}
