use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::RpcError;

mod bincode_codec;
pub use bincode_codec::build_bincode_pair;

/// A full-duplex byte stream: the one thing the core RPC machinery depends
/// on. Deliberately not `tokio::net::TcpStream` — a TCP listener/dialer is an
/// external collaborator. A TCP socket, an HTTP CONNECT-upgraded socket, and
/// an in-memory `tokio::io::DuplexStream` (used in tests) all qualify.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncDuplex for T {}

/// Wire-level envelope: service/method name, sequence number, error string.
/// An empty `error` means the call succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

/// Decodes headers and bodies off one direction of a connection.
///
/// Owned by exactly one reader — the server's per-connection serve loop, or
/// the client's receive task — so it never needs a lock: there is never a
/// second reader to race with.
#[async_trait]
pub trait CodecReader: Send {
    async fn read_header(&mut self) -> Result<Header, RpcError>;
    async fn read_body(&mut self) -> Result<Vec<u8>, RpcError>;
}

/// Encodes headers and bodies onto one direction of a connection.
///
/// Shared behind a mutex (see `server::Server` and `client::Client`) so many
/// callers can each write one header+body pair without interleaving their
/// bytes; a `write()` call does not block on the peer's read progress the
/// way `CodecReader::read_header` can, so contention here stays brief.
#[async_trait]
pub trait CodecWriter: Send {
    async fn write(&mut self, header: &Header, body: &[u8]) -> Result<(), RpcError>;
    async fn close(&mut self) -> Result<(), RpcError>;
}

/// A connection's reader and writer, vended together by [`CodecRegistry`].
///
/// Splitting the two capabilities, rather than one combined trait covering
/// both directions, is what lets a blocking `read_header` and a concurrent
/// `write` share one underlying stream without a single lock serializing
/// them against each other. `tokio::io::split` gives each half independent
/// ownership of its direction.
pub struct CodecPair {
    pub reader: Box<dyn CodecReader>,
    pub writer: Box<dyn CodecWriter>,
}

/// Identifies a registered wire codec, e.g. `"application/bincode"`.
pub type CodecType = String;

/// The default binary codec.
pub const CODEC_BINCODE: &str = "application/bincode";

type CodecCtor = Box<dyn Fn(Box<dyn AsyncDuplex>) -> CodecPair + Send + Sync>;

/// Maps codec-type identifiers to constructor functions.
///
/// An identifier absent from the registry causes the server to close the
/// connection without replying, and the client's dial to fail outright.
pub struct CodecRegistry {
    ctors: std::collections::HashMap<CodecType, CodecCtor>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let mut ctors: std::collections::HashMap<CodecType, CodecCtor> =
            std::collections::HashMap::new();
        ctors.insert(CODEC_BINCODE.to_string(), Box::new(build_bincode_pair));
        Self { ctors }
    }

    /// Registers an additional codec, or replaces the default one.
    pub fn register(
        &mut self,
        codec_type: impl Into<String>,
        ctor: impl Fn(Box<dyn AsyncDuplex>) -> CodecPair + Send + Sync + 'static,
    ) {
        self.ctors.insert(codec_type.into(), Box::new(ctor));
    }

    pub fn contains(&self, codec_type: &str) -> bool {
        self.ctors.contains_key(codec_type)
    }

    pub fn build(
        &self,
        codec_type: &str,
        stream: Box<dyn AsyncDuplex>,
    ) -> Result<CodecPair, RpcError> {
        let ctor = self
            .ctors
            .get(codec_type)
            .ok_or_else(|| RpcError::UnknownCodec(codec_type.to_string()))?;
        Ok(ctor(stream))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}
