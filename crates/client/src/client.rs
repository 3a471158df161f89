//! Upload and download orchestration.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use sfs_chunkio::{ReadAt, WindowReader, WriteAt, split, split_file, write_chunks};
use sfs_protocol::Chunk;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ClientError;
use crate::config::ClientConfig;
use crate::download::{Download, check_density};
use crate::error::aggregate;
use crate::placement::place;
use crate::transport::{ChunkStream, NodeTransport};

type TaskOutcome<T> = (u64, String, Result<T, ClientError>);

/// Cluster client.
///
/// Every chunk of a file is handled by its own task, each talking to the
/// chunk's node over a fresh connection.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    transport: NodeTransport,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let transport = NodeTransport::new(config.connect_timeout, config.io_timeout);
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Node that owns chunk `id` of `filename` in this client's cluster.
    pub fn node_for(&self, filename: &str, id: u64) -> Result<&str, ClientError> {
        self.ensure_nodes()?;
        Ok(place(filename, id, &self.config.nodes))
    }

    /// Uploads `total_size` bytes of `source` as `filename`.
    ///
    /// Every chunk is attempted even if others fail; all failures are
    /// reported.
    pub async fn upload<S>(
        &self,
        filename: &str,
        source: Arc<S>,
        total_size: u64,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError>
    where
        S: ReadAt + ?Sized + 'static,
    {
        self.ensure_nodes()?;
        let windows = split(source, total_size, self.config.chunk_size)?;
        self.upload_windows(filename, windows, cancel).await
    }

    /// Uploads a local file as `filename`. Returns the file size.
    pub async fn upload_file(
        &self,
        filename: &str,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<u64, ClientError> {
        self.ensure_nodes()?;
        let file = tokio::fs::File::open(path.as_ref()).await?.into_std().await;
        let (windows, size) = split_file(file, self.config.chunk_size)?;
        self.upload_windows(filename, windows, cancel).await?;
        Ok(size)
    }

    async fn upload_windows<S>(
        &self,
        filename: &str,
        windows: Vec<WindowReader<S>>,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError>
    where
        S: ReadAt + ?Sized + 'static,
    {
        let total: u64 = windows.iter().map(WindowReader::len).sum();
        let count = windows.len();
        let limiter = self.limiter();

        let mut tasks = JoinSet::new();
        for (id, window) in (0u64..).zip(windows) {
            let node = place(filename, id, &self.config.nodes).to_string();
            let chunk = Chunk::new(filename, id, window.len(), window);
            let transport = self.transport.clone();
            let limiter = limiter.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let result = async {
                    let _permit = acquire(limiter, &cancel).await?;
                    transport.send_chunk(&node, chunk, &cancel).await
                }
                .await;
                (id, node, result)
            });
        }

        let (_, failures) = join_chunks(&mut tasks).await;
        if !failures.is_empty() && cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        aggregate(failures)?;

        info!(filename, chunks = count, bytes = total, "upload complete");
        Ok(())
    }

    /// Lists what every node holds for `filename`, in node order.
    ///
    /// Fails if any node cannot be asked.
    pub async fn inventories(
        &self,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Vec<u64>)>, ClientError> {
        self.ensure_nodes()?;

        let queries = self.config.nodes.iter().map(|node| async move {
            let result = self.transport.list_chunk_ids(node, filename, cancel).await;
            (node.clone(), result)
        });

        let mut inventories = Vec::with_capacity(self.config.nodes.len());
        let mut failures = Vec::new();
        for (node, result) in join_all(queries).await {
            match result {
                Ok(ids) => inventories.push((node, ids)),
                Err(e) => failures.push(e),
            }
        }
        aggregate(failures)?;
        Ok(inventories)
    }

    /// Opens `filename` for streaming.
    ///
    /// The returned [`Download`] must be read to the end and then closed.
    pub async fn download(
        &self,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Download, ClientError> {
        let chunks = self.fetch(filename, cancel).await?;
        let download = Download::new(filename, chunks);
        info!(
            filename,
            chunks = download.chunk_count(),
            bytes = download.size(),
            "download ready"
        );
        Ok(download)
    }

    /// Downloads `filename` into a positional sink, writing chunks
    /// concurrently. Returns the number of bytes written.
    pub async fn download_to<S>(
        &self,
        filename: &str,
        sink: Arc<S>,
        cancel: &CancellationToken,
    ) -> Result<u64, ClientError>
    where
        S: WriteAt + ?Sized + 'static,
    {
        let chunks: Vec<_> = self
            .fetch(filename, cancel)
            .await?
            .into_iter()
            .map(|(_, chunk)| chunk)
            .collect();
        let count = chunks.len();

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            result = write_chunks(sink, chunks) => result?,
        };

        info!(filename, chunks = count, bytes = written, "download complete");
        Ok(written)
    }

    /// Discovers, checks and opens every chunk of `filename`, in id order.
    async fn fetch(
        &self,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Chunk<ChunkStream>)>, ClientError> {
        let located = merge_inventories(self.inventories(filename, cancel).await?);
        let count = check_density(located.keys().copied())?;
        let limiter = self.limiter();

        let mut tasks = JoinSet::new();
        for (id, node) in located {
            let transport = self.transport.clone();
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let filename = filename.to_string();

            tasks.spawn(async move {
                let result = async {
                    let _permit = acquire(limiter, &cancel).await?;
                    transport.recv_chunk(&node, &filename, id, &cancel).await
                }
                .await;
                (id, node, result)
            });
        }

        let (fetched, failures) = join_chunks(&mut tasks).await;
        if !failures.is_empty() && cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        aggregate(failures)?;

        // Completion order is arbitrary; slot by id.
        let mut slots: Vec<Option<(String, Chunk<ChunkStream>)>> =
            std::iter::repeat_with(|| None).take(fetched.len()).collect();
        for (id, node, chunk) in fetched {
            if let Some(slot) = usize::try_from(id).ok().and_then(|i| slots.get_mut(i)) {
                *slot = Some((node, chunk));
            }
        }

        let chunks: Vec<_> = slots.into_iter().flatten().collect();
        if chunks.len() as u64 != count {
            return Err(ClientError::Protocol(format!(
                "expected {count} chunks of {filename}, fetched {}",
                chunks.len()
            )));
        }
        Ok(chunks)
    }

    fn ensure_nodes(&self) -> Result<(), ClientError> {
        if self.config.nodes.is_empty() {
            return Err(ClientError::NoNodes);
        }
        Ok(())
    }

    fn limiter(&self) -> Option<Arc<Semaphore>> {
        self.config
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))))
    }
}

/// Builds the id to node map, walking inventories in node order. The first
/// node to report an id keeps it.
fn merge_inventories(inventories: Vec<(String, Vec<u64>)>) -> BTreeMap<u64, String> {
    let mut located = BTreeMap::new();
    for (node, ids) in inventories {
        for id in ids {
            match located.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(node.clone());
                }
                Entry::Occupied(owner) => {
                    warn!(
                        id,
                        kept = %owner.get(),
                        ignored = %node,
                        "chunk reported by more than one node"
                    );
                }
            }
        }
    }
    located
}

async fn acquire(
    limiter: Option<Arc<Semaphore>>,
    cancel: &CancellationToken,
) -> Result<Option<OwnedSemaphorePermit>, ClientError> {
    let Some(limiter) = limiter else {
        return Ok(None);
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        permit = limiter.acquire_owned() => permit.map(Some).map_err(|_| ClientError::Cancelled),
    }
}

/// Waits for every task. Successes come back unordered; failures come back
/// sorted by chunk id, each wrapped with its chunk and node.
async fn join_chunks<T: 'static>(
    tasks: &mut JoinSet<TaskOutcome<T>>,
) -> (Vec<(u64, String, T)>, Vec<ClientError>) {
    let mut done = Vec::new();
    let mut failed = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, node, Ok(value))) => done.push((id, node, value)),
            Ok((id, node, Err(e))) => {
                debug!(id, %node, "chunk failed: {e}");
                failed.push((
                    id,
                    ClientError::Chunk {
                        id,
                        node,
                        source: Box::new(e),
                    },
                ));
            }
            Err(e) => failed.push((u64::MAX, ClientError::Io(std::io::Error::other(e)))),
        }
    }

    failed.sort_by_key(|(id, _)| *id);
    (done, failed.into_iter().map(|(_, e)| e).collect())
}
