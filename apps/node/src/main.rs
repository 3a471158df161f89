//! SFS storage node entry point.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sfs_server::{NodeServer, ServerConfig};
use sfs_storage::FileStore;
use tracing_subscriber::EnvFilter;

use crate::config::NodeConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "SFS storage node")]
struct Args {
    /// Address to listen on (default 0.0.0.0:7070)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory chunks are stored under (default ./data)
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    }
    .with_overrides(args.listen, args.data_dir);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("can't create {}", config.data_dir.display()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "starting storage node"
    );

    let store = Arc::new(FileStore::new(&config.data_dir));
    let server = NodeServer::new(
        ServerConfig {
            bind_addr: config.listen,
        },
        store,
    );
    let listener = server.bind().await?;

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.serve(listener).await?;
    Ok(())
}
