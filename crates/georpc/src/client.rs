use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::{AsyncDuplex, CodecPair, CodecReader, CodecRegistry, CodecWriter, Header};
use crate::error::RpcError;
use crate::option::{write_handshake, ConnectOptions};

type PendingMap = Arc<AsyncMutex<HashMap<u64, oneshot::Sender<Result<Vec<u8>, RpcError>>>>>;
type SharedWriter = Arc<AsyncMutex<Box<dyn CodecWriter>>>;

/// A pending call: a sequence number, its service/method, and a handle that
/// resolves once the matching reply arrives (or the connection dies). A
/// `oneshot::Receiver` is the completion signal; there's no separate "done"
/// channel to manage on top of it.
pub struct Call {
    pub seq: u64,
    pub service_method: String,
    rx: oneshot::Receiver<Result<Vec<u8>, RpcError>>,
    pending: PendingMap,
}

impl Call {
    /// Awaits the reply body. Decoding into a concrete `Reply` type is
    /// `Client::call`'s job; this returns the raw bytes so callers that want
    /// to race several in-flight calls don't need `Reply: 'static` bounds.
    pub async fn done(self) -> Result<Vec<u8>, RpcError> {
        self.rx.await.unwrap_or(Err(RpcError::Shutdown))
    }

    /// Abandons the call: removes it from the pending table so a reply that
    /// arrives later is silently dropped instead of completing a receiver
    /// nobody is awaiting.
    pub async fn cancel(self) {
        let mut pending = self.pending.lock().await;
        pending.remove(&self.seq);
    }
}

/// Client-side connection state: one receive task demultiplexes replies by
/// sequence number into a pending-call table; any number of callers may
/// invoke [`Client::call`]/[`Client::go`] concurrently.
///
/// `writer` is the only lock shared between callers. Reads never take that
/// lock: the receive task owns the reader outright, exactly the split
/// `codec::CodecPair` was built for.
pub struct Client {
    writer: SharedWriter,
    seq: AtomicU64,
    pending: PendingMap,
    closing: AtomicBool,
    shutdown: Arc<AtomicBool>,
    receiver: JoinHandle<()>,
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

impl Client {
    /// Writes the handshake, builds the negotiated codec, and starts the
    /// receive task. Fails with [`RpcError::ConnectTimeout`] if the
    /// handshake doesn't complete within `opt.connect_timeout`.
    pub async fn dial<S: AsyncDuplex + 'static>(
        stream: S,
        opt: ConnectOptions,
    ) -> Result<Arc<Client>, RpcError> {
        Self::dial_with_registry(stream, opt, &CodecRegistry::new()).await
    }

    pub async fn dial_with_registry<S: AsyncDuplex + 'static>(
        stream: S,
        opt: ConnectOptions,
        codecs: &CodecRegistry,
    ) -> Result<Arc<Client>, RpcError> {
        let mut boxed: Box<dyn AsyncDuplex> = Box::new(stream);
        let connect_timeout = opt.connect_timeout;
        let handshake = async {
            write_handshake(&mut boxed, &opt).await?;
            Ok::<_, RpcError>(boxed)
        };
        let boxed = if connect_timeout.is_zero() {
            handshake.await?
        } else {
            tokio::time::timeout(connect_timeout, handshake)
                .await
                .map_err(|_| RpcError::ConnectTimeout(connect_timeout))??
        };

        let CodecPair { reader, writer } = codecs.build(&opt.codec_type, boxed)?;
        Ok(Self::spawn(reader, writer))
    }

    fn spawn(reader: Box<dyn CodecReader>, writer: Box<dyn CodecWriter>) -> Arc<Client> {
        let pending: PendingMap = Arc::new(AsyncMutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let receiver = {
            let pending = pending.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(Self::receive_loop(reader, pending, shutdown))
        };
        Arc::new(Client {
            writer: Arc::new(AsyncMutex::new(writer)),
            seq: AtomicU64::new(1),
            pending,
            closing: AtomicBool::new(false),
            shutdown,
            receiver,
        })
    }

    /// A call is usable as long as neither `Close` was called nor the
    /// transport has died.
    pub fn is_available(&self) -> bool {
        !self.closing.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst)
    }

    /// Registers a pending call and writes its request frame. Returns a
    /// [`Call`] the caller can `.done().await` or `.cancel().await`.
    pub async fn go<Args: Serialize>(
        &self,
        service_method: &str,
        args: &Args,
    ) -> Result<Call, RpcError> {
        let body = serde_json::to_vec(args).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.go_raw(service_method, body).await
    }

    /// Like [`Client::go`], but takes an already-encoded body. Used by
    /// [`crate::xclient::XClient::broadcast`], which serializes its
    /// argument once and fans the same bytes out to every server.
    pub async fn go_raw(&self, service_method: &str, body: Vec<u8>) -> Result<Call, RpcError> {
        if !self.is_available() {
            return Err(RpcError::Shutdown);
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(seq, tx);
        }

        let header = Header {
            service_method: service_method.to_string(),
            seq,
            error: String::new(),
        };

        let write_result = {
            let mut writer = self.writer.lock().await;
            writer.write(&header, &body).await
        };

        if let Err(err) = write_result {
            let mut pending = self.pending.lock().await;
            if let Some(tx) = pending.remove(&seq) {
                let _ = tx.send(Err(err.clone()));
            }
            return Err(err);
        }

        Ok(Call {
            seq,
            service_method: service_method.to_string(),
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Sends a request and awaits its reply, decoded as `Reply`.
    pub async fn call<Args, Reply>(&self, service_method: &str, args: &Args) -> Result<Reply, RpcError>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let call = self.go(service_method, args).await?;
        let reply_bytes = call.done().await?;
        serde_json::from_slice(&reply_bytes).map_err(|e| RpcError::DecodeBody(e.to_string()))
    }

    /// Like [`Client::call`], but takes an already-encoded body and returns
    /// the raw reply bytes.
    pub async fn call_raw(&self, service_method: &str, body: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let call = self.go_raw(service_method, body).await?;
        call.done().await
    }

    /// Idempotent: the second and later calls return [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<(), RpcError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }
        let mut writer = self.writer.lock().await;
        writer.close().await
    }

    async fn receive_loop(mut reader: Box<dyn CodecReader>, pending: PendingMap, shutdown: Arc<AtomicBool>) {
        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(err) => {
                    debug!(%err, "rpc client: connection lost, terminating pending calls");
                    shutdown.store(true, Ordering::SeqCst);
                    Self::terminate_calls(&pending, err).await;
                    return;
                }
            };

            // Always consume the body frame, even for a seq nobody is
            // waiting on (cancelled, or a bug upstream) — the frames are
            // sequential on the wire, so skipping one would desync every
            // read after it.
            let body_result = reader.read_body().await;

            let tx = {
                let mut pending = pending.lock().await;
                pending.remove(&header.seq)
            };
            let Some(tx) = tx else { continue };

            let result = if !header.error.is_empty() {
                Err(RpcError::Handler(header.error))
            } else {
                body_result
            };
            let _ = tx.send(result);
        }
    }

    async fn terminate_calls(pending: &PendingMap, err: RpcError) {
        let mut pending = pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::build_bincode_pair;
    use crate::server::Server;
    use crate::service::Service;

    #[derive(serde::Serialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct SumReply {
        c: i64,
    }

    async fn paired_client_and_server() -> (Arc<Client>, Arc<Server>) {
        let server = Server::new();
        server
            .register(
                Service::builder("Arith")
                    .method("Sum", |args: SumArgs| async move {
                        Ok::<_, RpcError>(SumReply { c: args.a + args.b })
                    })
                    .method("Boom", |()| async move {
                        Err::<(), _>(RpcError::Handler("boom".to_string()))
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let (client_stream, server_stream) = tokio::io::duplex(8192);
        {
            let server = server.clone();
            tokio::spawn(async move { server.serve_conn(server_stream).await });
        }
        let client = Client::dial(client_stream, ConnectOptions::default())
            .await
            .unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn successful_call_round_trips() {
        let (client, _server) = paired_client_and_server().await;
        let reply: SumReply = client.call("Arith.Sum", &SumArgs { a: 1, b: 2 }).await.unwrap();
        assert_eq!(reply, SumReply { c: 3 });
    }

    #[tokio::test]
    async fn handler_error_surfaces_to_caller() {
        let (client, _server) = paired_client_and_server().await;
        let err = client.call::<_, ()>("Arith.Boom", &()).await.unwrap_err();
        assert!(matches!(err, RpcError::Handler(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn unknown_method_surfaces_to_caller() {
        let (client, _server) = paired_client_and_server().await;
        let err = client.call::<_, ()>("Arith.Missing", &()).await.unwrap_err();
        assert!(matches!(err, RpcError::Handler(_)));
    }

    #[tokio::test]
    async fn sequence_numbers_increase_monotonically_and_replies_route_back() {
        let (client, _server) = paired_client_and_server().await;
        let first = client.go("Arith.Sum", &SumArgs { a: 1, b: 1 }).await.unwrap();
        let second = client.go("Arith.Sum", &SumArgs { a: 2, b: 2 }).await.unwrap();
        assert!(second.seq > first.seq);

        let second_reply: serde_json::Value =
            serde_json::from_slice(&second.done().await.unwrap()).unwrap();
        assert_eq!(second_reply["c"], 4);
        let first_reply: serde_json::Value =
            serde_json::from_slice(&first.done().await.unwrap()).unwrap();
        assert_eq!(first_reply["c"], 2);
    }

    #[tokio::test]
    async fn disconnect_terminates_all_pending_calls() {
        let server = Server::new();
        server
            .register(Service::builder("Arith").build().unwrap())
            .unwrap();
        let (client_stream, server_stream) = tokio::io::duplex(8192);
        drop(server_stream);
        let client = Client::dial(client_stream, ConnectOptions::default())
            .await
            .unwrap();
        let _ = server; // kept alive only to mirror the fixture shape

        let err = client.call::<_, ()>("Arith.Sum", &()).await.unwrap_err();
        assert!(matches!(err, RpcError::Eof | RpcError::Transport(_)));
    }

    #[test]
    fn build_bincode_pair_is_reexported_for_custom_registries() {
        // Smoke-tests the re-export used by `CodecRegistry::register` callers
        // who want to wrap the default codec rather than writing their own.
        let _ = build_bincode_pair;
    }
}
