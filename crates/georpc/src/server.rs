use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::codec::{AsyncDuplex, CodecPair, CodecRegistry, CodecReader, CodecWriter, Header};
use crate::error::RpcError;
use crate::option::{read_handshake, MAGIC_NUMBER};
use crate::service::Service;

/// Default path the HTTP tunnel listens on.
pub const DEFAULT_RPC_PATH: &str = "/_geerpc_";
/// Status line the HTTP tunnel writes after a successful CONNECT.
pub const CONNECTED_STATUS: &str = "HTTP/1.0 200 Connected to GeoRPC";

type SharedWriter = Arc<AsyncMutex<Box<dyn CodecWriter>>>;

/// Accepts connections for a generic transport.
///
/// The core never dials or listens on TCP itself; a consumer wraps its
/// transport (a `TcpListener`, a Unix socket, ...) in this trait.
/// `georpc-demo` implements it for `tokio::net::TcpListener`.
#[async_trait::async_trait]
pub trait Listener: Send {
    type Conn: AsyncDuplex + 'static;
    async fn accept(&mut self) -> std::io::Result<Self::Conn>;
}

/// An RPC server: a concurrent name -> [`Service`] registry, plus connection
/// and per-request dispatch handling.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
    codecs: CodecRegistry,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
            codecs: CodecRegistry::new(),
        })
    }

    pub fn with_codecs(codecs: CodecRegistry) -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
            codecs,
        })
    }

    /// Registers a service; fails if one of the same name is already
    /// registered.
    pub fn register(&self, service: Service) -> Result<(), RpcError> {
        let mut services = self.services.write().expect("service registry poisoned");
        if services.contains_key(service.name()) {
            return Err(RpcError::ServiceAlreadyDefined(service.name().to_string()));
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, String), RpcError> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| RpcError::MalformedServiceMethod(service_method.to_string()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);
        let services = self.services.read().expect("service registry poisoned");
        let service = services
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        Ok((service, method_name.to_string()))
    }

    /// Accepts connections from `listener` until it errors, spawning a
    /// connection handler per accepted connection.
    pub async fn accept<L: Listener>(self: &Arc<Self>, mut listener: L) {
        loop {
            match listener.accept().await {
                Ok(conn) => {
                    let server = self.clone();
                    tokio::spawn(async move { server.serve_conn(conn).await });
                }
                Err(err) => {
                    debug!(%err, "rpc server: accept error, stopping accept loop");
                    return;
                }
            }
        }
    }

    /// Runs the server on a single connection until the client hangs up or
    /// the handshake fails.
    pub async fn serve_conn<S: AsyncDuplex + 'static>(self: &Arc<Self>, stream: S) {
        let boxed: Box<dyn AsyncDuplex> = Box::new(stream);
        self.serve_boxed_conn(boxed).await;
    }

    pub(crate) async fn serve_boxed_conn(self: &Arc<Self>, mut boxed: Box<dyn AsyncDuplex>) {
        let opt = match read_handshake(&mut boxed).await {
            Ok(opt) => opt,
            Err(err) => {
                warn!(%err, "rpc server: options error");
                return;
            }
        };

        if opt.magic_number != MAGIC_NUMBER {
            warn!(magic = format!("{:#x}", opt.magic_number), "rpc server: invalid magic number");
            return;
        }

        let CodecPair { mut reader, writer } = match self.codecs.build(&opt.codec_type, boxed) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "rpc server: invalid codec type");
                return;
            }
        };

        let writer: SharedWriter = Arc::new(AsyncMutex::new(writer));
        self.serve_codec(reader.as_mut(), &writer, opt.handle_timeout)
            .await;
        let _ = writer.lock().await.close().await;
    }

    async fn serve_codec(
        self: &Arc<Self>,
        reader: &mut dyn CodecReader,
        writer: &SharedWriter,
        handle_timeout: Duration,
    ) {
        let mut dispatches = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(RpcError::Eof) => break,
                Err(err) => {
                    debug!(%err, "rpc server: read header error, closing connection");
                    break;
                }
            };

            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(%err, "rpc server: read body error");
                    let reply_header = Header {
                        service_method: header.service_method,
                        seq: header.seq,
                        error: err.to_string(),
                    };
                    Self::send_reply(writer, reply_header, Vec::new()).await;
                    continue;
                }
            };

            let server = self.clone();
            let writer = writer.clone();
            dispatches.spawn(async move {
                server.dispatch(header, body, writer, handle_timeout).await;
            });
        }

        while dispatches.join_next().await.is_some() {}
    }

    async fn dispatch(
        self: Arc<Self>,
        header: Header,
        body: Vec<u8>,
        writer: SharedWriter,
        handle_timeout: Duration,
    ) {
        let seq = header.seq;
        let service_method = header.service_method.clone();

        let (service, method) = match self.find_service(&service_method) {
            Ok(pair) => pair,
            Err(err) => {
                let reply_header = Header {
                    service_method,
                    seq,
                    error: err.to_string(),
                };
                Self::send_reply(&writer, reply_header, Vec::new()).await;
                return;
            }
        };

        if handle_timeout.is_zero() {
            let (reply_header, reply_body) =
                Self::invoke(&service, &method, &body, seq, &service_method).await;
            Self::send_reply(&writer, reply_header, reply_body).await;
            return;
        }

        // `tokio::select!` drops whichever branch loses: if the timeout
        // fires first, the invocation future is simply never polled again,
        // which gives "at most one reply per request" for free.
        tokio::select! {
            (reply_header, reply_body) = Self::invoke(&service, &method, &body, seq, &service_method) => {
                Self::send_reply(&writer, reply_header, reply_body).await;
            }
            _ = tokio::time::sleep(handle_timeout) => {
                let err = RpcError::HandleTimeout(handle_timeout);
                let reply_header = Header { service_method, seq, error: err.to_string() };
                Self::send_reply(&writer, reply_header, Vec::new()).await;
            }
        }
    }

    async fn invoke(
        service: &Arc<Service>,
        method: &str,
        body: &[u8],
        seq: u64,
        service_method: &str,
    ) -> (Header, Vec<u8>) {
        match service.call(method, body).await {
            Ok(reply_bytes) => (
                Header {
                    service_method: service_method.to_string(),
                    seq,
                    error: String::new(),
                },
                reply_bytes,
            ),
            Err(err) => (
                Header {
                    service_method: service_method.to_string(),
                    seq,
                    error: err.to_string(),
                },
                Vec::new(),
            ),
        }
    }

    async fn send_reply(writer: &SharedWriter, header: Header, body: Vec<u8>) {
        let mut guard = writer.lock().await;
        if let Err(err) = guard.write(&header, &body).await {
            warn!(%err, "rpc server: write response error");
        }
    }
}
