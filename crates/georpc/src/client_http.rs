use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::client::Client;
use crate::codec::AsyncDuplex;
use crate::error::RpcError;
use crate::framing::read_line;
use crate::option::ConnectOptions;
use crate::server::{CONNECTED_STATUS, DEFAULT_RPC_PATH};

impl Client {
    /// Dials over an HTTP `CONNECT` upgrade instead of a plain handshake
    ///: writes `CONNECT <path> HTTP/1.0`, expects
    /// [`CONNECTED_STATUS`] back, then proceeds exactly like [`Client::dial`].
    pub async fn dial_http<S: AsyncDuplex + 'static>(
        stream: S,
        opt: ConnectOptions,
    ) -> Result<Arc<Client>, RpcError> {
        Self::dial_http_path(stream, DEFAULT_RPC_PATH, opt).await
    }

    pub async fn dial_http_path<S: AsyncDuplex + 'static>(
        mut stream: S,
        path: &str,
        opt: ConnectOptions,
    ) -> Result<Arc<Client>, RpcError> {
        let request = format!("CONNECT {path} HTTP/1.0\n\n");
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(RpcError::from)?;

        let status = read_line(&mut stream).await.map_err(RpcError::from)?;
        let status = String::from_utf8_lossy(&status);
        let status = status.trim_end();
        if status != CONNECTED_STATUS {
            return Err(RpcError::UnexpectedHttpResponse(status.to_string()));
        }
        // The status line is followed by a blank line, matching the server's
        // `"{CONNECTED_STATUS}\n\n"` response.
        let _blank = read_line(&mut stream).await.map_err(RpcError::from)?;

        Client::dial(stream, opt).await
    }
}
