use std::time::Duration;

use thiserror::Error;

/// Errors surfaced across the wire protocol, dispatch, and client layers.
///
/// One `Clone`-able enum rather than a tree of concern-specific types: a
/// single transport failure has to fan out to every pending call at once,
/// so every variant is made of owned, cloneable data (error strings rather
/// than the underlying `io::Error`/`serde_json::Error`).
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("rpc: unknown codec type `{0}`")]
    UnknownCodec(String),

    #[error("rpc: invalid magic number {0:#x}")]
    BadMagicNumber(u32),

    #[error("rpc: options error: {0}")]
    Handshake(String),

    #[error("rpc: {0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("rpc: transport error: {0}")]
    Transport(String),

    #[error("rpc: connection closed")]
    Eof,

    #[error("rpc: failed to decode header: {0}")]
    DecodeHeader(String),

    #[error("rpc: failed to decode body: {0}")]
    DecodeBody(String),

    #[error("rpc: failed to encode message: {0}")]
    Encode(String),

    #[error("rpc server: service/method request ill-formed: {0}")]
    MalformedServiceMethod(String),

    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    #[error("rpc: service already defined: {0}")]
    ServiceAlreadyDefined(String),

    #[error("{0}")]
    Handler(String),

    #[error("rpc server: request handle timeout: expect within {0:?}")]
    HandleTimeout(Duration),

    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("rpc client: call failed: {0}")]
    Cancelled(String),

    #[error("rpc client: connection is shut down")]
    Shutdown,

    #[error("rpc client: wrong format `{0}`, expect protocol@addr")]
    BadAddress(String),

    #[error("rpc client: unexpected HTTP response: {0}")]
    UnexpectedHttpResponse(String),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}
