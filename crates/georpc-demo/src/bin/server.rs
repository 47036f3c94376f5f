//! Serves the `Arith` service over plain TCP and, on a second port, over an
//! HTTP CONNECT tunnel — the two transports Scenario G asks to be
//! interchangeable.

use clap::Parser;
use georpc::Server;
use georpc_demo::{build_arith_service, TcpListener};
use tracing::info;

#[derive(Parser)]
struct Args {
    /// Address the plain-TCP listener binds to.
    #[arg(long, default_value = "127.0.0.1:9000")]
    tcp_addr: String,

    /// Address the HTTP CONNECT tunnel listener binds to.
    #[arg(long, default_value = "127.0.0.1:9001")]
    http_addr: String,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let server = Server::new();
    server
        .register(build_arith_service())
        .expect("Arith is the only service registered once");

    let (tcp_listener, tcp_addr) =
        TcpListener::bind(args.tcp_addr.parse().expect("valid socket address")).await?;
    info!(%tcp_addr, "georpc-demo: listening for plain TCP connections");

    let http_listener = tokio::net::TcpListener::bind(&args.http_addr).await?;
    info!(addr = %args.http_addr, "georpc-demo: listening for HTTP CONNECT tunnels");

    let http_server = server.clone();
    let http_task = tokio::spawn(async move {
        loop {
            match http_listener.accept().await {
                Ok((stream, peer)) => {
                    let server = http_server.clone();
                    tokio::spawn(async move {
                        info!(%peer, "georpc-demo: accepted HTTP tunnel connection");
                        server.serve_http(stream, georpc::server::DEFAULT_RPC_PATH).await;
                    });
                }
                Err(err) => {
                    tracing::warn!(%err, "georpc-demo: HTTP listener accept error");
                    return;
                }
            }
        }
    });

    server.accept(tcp_listener).await;
    http_task.abort();
    Ok(())
}
