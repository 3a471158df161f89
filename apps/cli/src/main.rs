//! SFS command-line client.

mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use sfs_client::{Client, ClientError};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{FileConfig, NODES_ENV, Overrides};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Sharded file storage client")]
struct Args {
    /// Comma separated node addresses (overrides SFS_ADDRS)
    #[arg(long)]
    nodes: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chunk size in bytes for uploads
    #[arg(long = "chunk-size")]
    chunk_size: Option<u64>,

    /// Maximum simultaneous chunk transfers (unbounded by default)
    #[arg(long = "max-in-flight")]
    max_in_flight: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file
    Upload {
        path: PathBuf,

        /// Name to store the file under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download a file to a local path
    Download { name: String, dest: PathBuf },
    /// Show which chunks every node holds for a file
    Ls { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let env_nodes = std::env::var(NODES_ENV).ok();
    let config = config::resolve(
        file,
        env_nodes.as_deref(),
        Overrides {
            nodes: args.nodes,
            chunk_size: args.chunk_size,
            max_in_flight: args.max_in_flight,
        },
    );
    if config.nodes.is_empty() {
        bail!("no storage nodes configured (use --nodes, {NODES_ENV} or a config file)");
    }

    debug!(
        nodes = ?config.nodes,
        chunk_size = config.chunk_size,
        max_in_flight = ?config.max_in_flight,
        "client configured"
    );

    let client = Client::new(config);
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling transfers");
            signal_cancel.cancel();
        }
    });

    match args.command {
        Command::Upload { path, name } => upload(&client, &path, name, &cancel).await,
        Command::Download { name, dest } => download(&client, &name, &dest, &cancel).await,
        Command::Ls { name } => list(&client, &name, &cancel).await,
    }
}

async fn upload(
    client: &Client,
    path: &Path,
    name: Option<String>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .with_context(|| format!("can't derive a name from {}", path.display()))?,
    };

    let size = client
        .upload_file(&name, path, cancel)
        .await
        .with_context(|| format!("upload of {} failed", path.display()))?;
    println!("uploaded {name} ({size} bytes)");
    Ok(())
}

async fn download(
    client: &Client,
    name: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut download = client
        .download(name, cancel)
        .await
        .with_context(|| format!("download of {name} failed"))?;
    let expected = download.size();
    debug!(name, chunks = download.chunk_count(), bytes = expected, "download opened");

    let file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("can't create {}", dest.display()))?;
    let mut out = BufWriter::new(file);

    let copied = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ClientError::Cancelled.into()),
        result = tokio::io::copy(&mut download, &mut out) => result?,
    };
    out.flush().await?;
    download.close().await?;

    if copied != expected {
        return Err(ClientError::SizeMismatch {
            expected,
            actual: copied,
        }
        .into());
    }

    println!("downloaded {name} to {} ({copied} bytes)", dest.display());
    Ok(())
}

async fn list(client: &Client, name: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
    let inventories = client.inventories(name, cancel).await?;
    for (node, ids) in inventories {
        let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
        println!("{node}: [{}]", ids.join(", "));
    }
    Ok(())
}
