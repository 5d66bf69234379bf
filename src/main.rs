use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::{Arc, Mutex},
};

use aurelius::{causal_kv::Replica, clock::NodeId, net::HttpNet, server};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "tikv-jemallocator")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let usage = "usage: aurelius <node_id> <port> <cluster_map_json>";
    let mut args = std::env::args().skip(1);
    let id: NodeId = args.next().ok_or(anyhow::format_err!("{usage}"))?;
    let port = args
        .next()
        .ok_or(anyhow::format_err!("{usage}"))?
        .parse::<u16>()?;
    let cluster: HashMap<NodeId, String> =
        serde_json::from_str(&args.next().ok_or(anyhow::format_err!("{usage}"))?)?;
    anyhow::ensure!(args.next().is_none(), "{usage}");
    anyhow::ensure!(
        cluster.contains_key(&id),
        "node {id} missing from cluster map"
    );

    let net = HttpNet::new(&id, &cluster)?;
    let replica = Replica::new(id.clone(), cluster.keys().cloned(), net);
    info!(%id, port, peers = cluster.len() - 1, clock = ?replica.clock(), "node initialized");

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    axum::serve(listener, server::app(Arc::new(Mutex::new(replica))))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

// cSpell:words jemallocator
