//! Drives the `georpc-server` demo through [`georpc::XClient`]: a plain-TCP
//! call, an HTTP-tunnel call against the same logical service, and a
//! deliberately slow call that trips the handle timeout.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use georpc::{ConnectOptions, MultiServersDiscovery, SelectMode, XClient};
use georpc_demo::TcpDialer;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9000")]
    tcp_addr: String,

    #[arg(long, default_value = "127.0.0.1:9001")]
    http_addr: String,
}

#[derive(Serialize)]
struct SumArgs {
    a: i64,
    b: i64,
}

#[derive(Deserialize, Debug)]
struct SumReply {
    c: i64,
}

#[derive(Serialize)]
struct SleepArgs {
    millis: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    // Scenario A, over plain TCP.
    let tcp_discovery = Arc::new(MultiServersDiscovery::new(vec![format!("tcp@{}", args.tcp_addr)]));
    let tcp_client = XClient::new(
        tcp_discovery,
        SelectMode::RoundRobin,
        ConnectOptions::default(),
        Arc::new(TcpDialer),
    );
    let reply: SumReply = tcp_client.call("Arith.Sum", &SumArgs { a: 2, b: 3 }).await?;
    info!(sum = reply.c, "Arith.Sum over plain TCP");
    assert_eq!(reply.c, 5);

    // Scenario G: the same call over an HTTP CONNECT tunnel.
    let http_discovery = Arc::new(MultiServersDiscovery::new(vec![format!("http@{}", args.http_addr)]));
    let http_client = XClient::new(
        http_discovery,
        SelectMode::RoundRobin,
        ConnectOptions::default(),
        Arc::new(TcpDialer),
    );
    let reply: SumReply = http_client.call("Arith.Sum", &SumArgs { a: 2, b: 3 }).await?;
    info!(sum = reply.c, "Arith.Sum over HTTP CONNECT tunnel");
    assert_eq!(reply.c, 5);

    // Scenario D: a call whose handler outruns a tight handle timeout.
    let opt = ConnectOptions::default().with_handle_timeout(Duration::from_millis(100));
    let timeout_discovery = Arc::new(MultiServersDiscovery::new(vec![format!("tcp@{}", args.tcp_addr)]));
    let timeout_client = XClient::new(timeout_discovery, SelectMode::RoundRobin, opt, Arc::new(TcpDialer));
    match timeout_client
        .call::<_, ()>("Arith.Sleep", &SleepArgs { millis: 500 })
        .await
    {
        Err(err) => info!(%err, "Arith.Sleep timed out as expected"),
        Ok(()) => return Err("expected a handle timeout error".into()),
    }

    tcp_client.close().await;
    http_client.close().await;
    timeout_client.close().await;
    Ok(())
}
