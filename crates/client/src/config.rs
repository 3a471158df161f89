use std::time::Duration;

/// Default chunk size (2 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Default dial timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Storage node addresses (`host:port`). Order matters: it drives
    /// placement and duplicate resolution.
    pub nodes: Vec<String>,
    pub chunk_size: u64,
    pub connect_timeout: Duration,
    /// Per-request timeout once connected. `None` waits indefinitely.
    pub io_timeout: Option<Duration>,
    /// Maximum simultaneous per-chunk requests. `None` is unbounded.
    pub max_in_flight: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: None,
            max_in_flight: None,
        }
    }
}

impl ClientConfig {
    pub fn with_nodes<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Parses a comma separated node list, as found in `SFS_ADDRS`.
pub fn parse_nodes(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
