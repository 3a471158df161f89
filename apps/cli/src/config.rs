//! Client configuration.
//!
//! Sources, highest precedence first: command-line flags, the `SFS_ADDRS`
//! environment variable (node list only), an optional JSON file, defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sfs_client::{ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT, parse_nodes};

/// Environment variable holding a comma separated node list.
pub const NODES_ENV: &str = "SFS_ADDRS";

/// On-disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default)]
    pub chunk_size: Option<u64>,

    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    #[serde(default)]
    pub io_timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("can't read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }
}

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub nodes: Option<String>,
    pub chunk_size: Option<u64>,
    pub max_in_flight: Option<usize>,
}

/// Merges every source into a [`ClientConfig`].
pub fn resolve(file: FileConfig, env_nodes: Option<&str>, flags: Overrides) -> ClientConfig {
    let nodes = match (flags.nodes.as_deref(), env_nodes) {
        (Some(list), _) => parse_nodes(list),
        (None, Some(list)) if !parse_nodes(list).is_empty() => parse_nodes(list),
        _ => file.nodes,
    };

    ClientConfig {
        nodes,
        chunk_size: flags
            .chunk_size
            .or(file.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE),
        connect_timeout: file
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        io_timeout: file.io_timeout_secs.map(Duration::from_secs),
        max_in_flight: flags.max_in_flight.or(file.max_in_flight),
    }
}
