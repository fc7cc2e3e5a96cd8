use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use clap::Parser;
use kvstore_cluster::config::StoreConfig;
use kvstore_cluster::placement::StrategyType;
use kvstore_cluster::storage::handlers::*;
use kvstore_cluster::storage::protocol::*;
use kvstore_cluster::storage::store::{Store, StoreStats};
use kvstore_cluster::transport::udp::UdpTransport;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type NodeStore = Store<String, String>;

/// Distance between the gossip port and the HTTP port.
const HTTP_PORT_OFFSET: u16 = 1000;

/// One node of a partitioned in-memory key-value store.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Gossip address; the HTTP API listens on the same IP, port + 1000.
    #[arg(long)]
    bind: SocketAddr,

    /// Existing member to join through. Repeatable.
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// TOML store configuration. Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyType>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    transfer_batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let http_addr = http_addr_for(args.bind)?;

    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config = config.with_strategy(strategy);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(timeout_ms));
    }
    if args.transfer_batch_size.is_some() {
        config = config.with_transfer_batch_size(args.transfer_batch_size);
    }

    tracing::info!("Starting node on {}", args.bind);
    if !args.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", args.seeds);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip):
    let transport = Arc::new(UdpTransport::bind(args.bind, args.seeds.clone()).await?);
    tracing::info!("Node ID: {}", transport.membership().local_node.id);

    // 2. Storage layer:
    let store: Arc<NodeStore> = Arc::new(Store::new(config, transport.clone()));
    store.open()?;

    // 3. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_PUT, post(handle_put_value))
        .route(&format!("{}/:key", ENDPOINT_GET), get(handle_get_value))
        .route(ENDPOINT_STATS, get(handle_node_stats))
        .layer(Extension(store.clone()));

    // 4. Spawn stats reporter:
    let stats_store = store.clone();
    let stats_transport = transport.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let Ok(stats) = stats_store.stats() else {
                continue;
            };
            tracing::info!(
                "Cluster stats: view v{} with {} members, {} local entries, {} pending",
                stats.view_version,
                stats.members.len(),
                stats.local_entries,
                stats.pending_requests
            );
            for node in stats_transport.membership().get_alive_members() {
                tracing::info!("  - {} addr={} (inc={})", node.id, node.addr, node.incarnation);
            }
        }
    });

    // 5. Start HTTP server:
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Shutting down");
    store.close();

    Ok(())
}

fn http_addr_for(bind: SocketAddr) -> anyhow::Result<SocketAddr> {
    let port = bind.port().checked_add(HTTP_PORT_OFFSET).ok_or_else(|| {
        anyhow::anyhow!(
            "gossip port {} leaves no room for the HTTP port (+{})",
            bind.port(),
            HTTP_PORT_OFFSET
        )
    })?;
    Ok(SocketAddr::new(bind.ip(), port))
}

async fn handle_get_value(
    store: Extension<Arc<NodeStore>>,
    key: Path<String>,
) -> (StatusCode, Json<GetResponse>) {
    handle_get::<String, String>(store, key).await
}

async fn handle_put_value(
    store: Extension<Arc<NodeStore>>,
    json: Json<PutRequest>,
) -> (StatusCode, Json<PutResponse>) {
    handle_put::<String, String>(store, json).await
}

async fn handle_node_stats(
    store: Extension<Arc<NodeStore>>,
) -> Result<Json<StoreStats>, StatusCode> {
    handle_stats::<String, String>(store).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_addr_follows_gossip_port() {
        let addr = http_addr_for("127.0.0.1:5000".parse().unwrap()).unwrap();
        assert_eq!(addr, "127.0.0.1:6000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_http_port_overflow_is_an_error() {
        assert!(http_addr_for("127.0.0.1:65000".parse().unwrap()).is_err());
        assert!(http_addr_for("127.0.0.1:64535".parse().unwrap()).is_ok());
    }
}
