//! riorita server binary.
//!
//! Boots the storage backend and the result cache, binds the TCP
//! acceptor, and serves until SIGINT or SIGTERM. The engine is closed on
//! the way out; any fatal initialization or runtime error exits non-zero.
//!
//! ```bash
//! riorita --data /var/lib/riorita --port 8024 --backend compact \
//!         --allowed "127.0.0.1;10.0.0.0/8" --log /var/log/riorita.log
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use riorita_server::{bind, AllowList, ServerConfig, ServerState};
use riorita_storage::{BackendKind, CacheConfig, ResultCache, Storage, StorageConfig};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "riorita")]
#[command(about = "Networked key-value storage server", long_about = None)]
struct Cli {
    /// Log file; logs go to stderr when omitted
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Data directory
    #[arg(long, value_name = "PATH", env = "RIORITA_DATA", default_value = "./data")]
    data: PathBuf,

    /// Storage backend: compact, files, memory, leveldb or rocksdb
    #[arg(long, default_value = "compact")]
    backend: String,

    /// TCP port to listen on
    #[arg(long, env = "RIORITA_PORT", default_value_t = 8024)]
    port: u16,

    /// Semicolon-separated allowed peers: "ip" or "ip/prefix" entries.
    /// Everyone is admitted when omitted.
    #[arg(long, value_name = "CIDRS")]
    allowed: Option<String>,

    /// Shard count for the compact backend
    #[arg(long, default_value_t = 8)]
    groups: usize,

    /// Fsync the index log after every append
    #[arg(long)]
    sync_index: bool,
}

fn init_tracing(log: Option<&PathBuf>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_ref())?;

    let backend: BackendKind = cli
        .backend
        .parse()
        .with_context(|| format!("unknown backend {:?}", cli.backend))?;

    let storage_config = StorageConfig {
        root: cli.data.clone(),
        groups: cli.groups,
        sync_index: cli.sync_index,
        ..StorageConfig::default()
    };

    tracing::info!(
        backend = %backend,
        data = %cli.data.display(),
        groups = cli.groups,
        "initializing storage"
    );
    let storage = Storage::open(backend, storage_config)
        .await
        .context("opening storage backend")?;
    let cache = ResultCache::new(CacheConfig::default());
    let state = Arc::new(ServerState { storage, cache });

    let allowed = cli
        .allowed
        .as_deref()
        .map(AllowList::parse)
        .transpose()
        .context("parsing --allowed")?;

    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, cli.port));
    let server = bind(ServerConfig { bind_addr, allowed }, state)
        .await
        .context("binding listener")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
            _ = terminate => tracing::info!("received SIGTERM, shutting down"),
        }
        let _ = shutdown_tx.send(());
    });

    server.run_until(shutdown_rx).await?;

    // Note: Storage::close is a reset that wipes the data root; a normal
    // shutdown just stops accepting and lets the process exit. There is
    // no in-process write buffering to flush.
    tracing::info!("riorita shut down cleanly");
    Ok(())
}
