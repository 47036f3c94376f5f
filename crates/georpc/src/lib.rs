#![forbid(unsafe_code)]
//! A multiplexed RPC framework: a framed request/response protocol over a
//! generic duplex byte stream, a server dispatch engine, a client
//! multiplexer, and a discovery-backed client (`XClient`) with broadcast.
//!
//! ## Wire protocol
//! A connection starts with one newline-terminated JSON [`option::ConnectOptions`]
//! object identifying the magic number and negotiated [`codec::CodecType`];
//! every header/body pair after that is framed by the negotiated
//! [`codec::CodecReader`]/[`codec::CodecWriter`] pair (bincode-backed by
//! default). An HTTP `CONNECT` upgrade (see [`server_http`]/[`client_http`])
//! lets a GeoRPC listener share a port with an HTTP server.
//!
//! ## Server side
//! Register one or more [`service::Service`]s (built via [`service::ServiceBuilder`])
//! on a [`server::Server`], then drive it with [`server::Server::accept`] (generic
//! over any [`server::Listener`]) or hand it individual connections through
//! [`server::Server::serve_conn`].
//!
//! ## Client side
//! [`client::Client::dial`] completes the handshake and starts a receive
//! task that demultiplexes replies by sequence number; [`client::Client::call`]
//! and [`client::Client::go`] send requests. [`xclient::XClient`] adds
//! [`discovery::Discovery`]-backed server selection, per-address client
//! caching, and [`xclient::XClient::broadcast`] fan-out.
//!
//! A `tokio::net::TcpStream` (or any other `AsyncRead + AsyncWrite + Unpin +
//! Send` type) is all [`client::Client::dial`] needs — TCP listening/dialing
//! itself lives outside this crate; see the `georpc-demo` crate for a
//! runnable example wired over real sockets.

pub mod client;
pub mod client_http;
pub mod codec;
pub mod discovery;
pub mod error;
mod framing;
pub mod option;
pub mod server;
pub mod server_http;
pub mod service;
pub mod xclient;

pub use client::{Call, Client};
pub use codec::{AsyncDuplex, CodecPair, CodecReader, CodecRegistry, CodecType, CodecWriter, Header, CODEC_BINCODE};
pub use discovery::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode};
pub use error::RpcError;
pub use option::ConnectOptions;
pub use server::{Listener, Server};
pub use service::{Service, ServiceBuilder};
pub use xclient::{Dialer, XClient};
