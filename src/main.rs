//! Herald server binary.

use anyhow::{Context, Result};
use clap::Parser;
use herald::{http, FsObjectStore, MemoryObjectStore, ObjectStore, Relay, RelayConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Event stream relay with durable replay and webhook cache invalidation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Directory holding persisted events; omit to keep them in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// How far back a reconnect without a usable watermark replays
    #[arg(long, default_value = "900")]
    replay_window_secs: u64,

    /// Heartbeat interval on idle streams
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,

    /// Default cache entry lifetime
    #[arg(long, default_value = "300")]
    cache_ttl_secs: u64,

    /// Max cache entries
    #[arg(long, default_value = "1024")]
    cache_capacity: usize,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            replay_window: Duration::from_secs(self.replay_window_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_capacity: self.cache_capacity,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .parse::<Level>()
        .with_context(|| format!("Invalid log level: {}", args.log_level))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    let objects: Arc<dyn ObjectStore> = match &args.data_dir {
        Some(dir) => Arc::new(
            FsObjectStore::open(dir)
                .with_context(|| format!("Failed to open data directory {}", dir.display()))?,
        ),
        None => {
            info!("no data directory given, events will not survive a restart");
            Arc::new(MemoryObjectStore::new())
        }
    };

    let relay = Relay::start(objects, args.relay_config());
    let router = http::router(Arc::clone(&relay));

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", args.bind))?;
    info!("listening on {}", args.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(http::shutdown_signal(Arc::clone(&relay)))
        .await
        .context("Server error occurred")?;

    relay.shutdown().await.context("Failed to stop relay")?;
    Ok(())
}
