use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::RwLock;

use sfs_protocol::Chunk;
use tokio::io::AsyncReadExt;

use crate::validation::validate_filename;
use crate::{ChunkBody, ChunkStore, StorageError, StoreFuture, StoredChunk};

/// In-memory chunk storage.
///
/// Applies the same filename rules as [`FileStore`](crate::FileStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    chunks: RwLock<BTreeMap<(String, u64), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a stored body.
    pub fn get_bytes(&self, filename: &str, id: u64) -> Option<Vec<u8>> {
        self.read_map().get(&(filename.to_string(), id)).cloned()
    }

    /// Number of stored chunks across all files.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `(filename, id)` held by this store.
    pub fn keys(&self) -> Vec<(String, u64)> {
        self.read_map().keys().cloned().collect()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<(String, u64), Vec<u8>>> {
        self.chunks.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn store(&self, chunk: Chunk<ChunkBody<'_>>) -> Result<(), StorageError> {
        validate_filename(&chunk.filename)?;
        let capacity = usize::try_from(chunk.size).unwrap_or(0).min(1 << 20);
        let mut data = Vec::with_capacity(capacity);
        chunk
            .body
            .take(chunk.size)
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::io("can't read chunk body", e))?;

        if (data.len() as u64) < chunk.size {
            return Err(StorageError::ShortBody {
                filename: chunk.filename,
                id: chunk.id,
                written: data.len() as u64,
                expected: chunk.size,
            });
        }

        self.chunks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((chunk.filename, chunk.id), data);
        Ok(())
    }

    fn open(&self, filename: &str, id: u64) -> Result<StoredChunk, StorageError> {
        validate_filename(filename)?;
        let data = self
            .get_bytes(filename, id)
            .ok_or(StorageError::NotFound)?;
        let size = data.len() as u64;
        let body: ChunkBody<'static> = Box::pin(Cursor::new(data));
        Ok(Chunk::new(filename, id, size, body))
    }

    fn list(&self, filename: &str) -> Result<Vec<u64>, StorageError> {
        validate_filename(filename)?;
        let ids: Vec<u64> = self
            .read_map()
            .keys()
            .filter(|(name, _)| name == filename)
            .map(|(_, id)| *id)
            .collect();

        if ids.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(ids)
    }
}

impl ChunkStore for MemoryStore {
    fn store_chunk<'a>(&'a self, chunk: Chunk<ChunkBody<'a>>) -> StoreFuture<'a, ()> {
        Box::pin(self.store(chunk))
    }

    fn get_chunk<'a>(&'a self, filename: &'a str, id: u64) -> StoreFuture<'a, StoredChunk> {
        Box::pin(std::future::ready(self.open(filename, id)))
    }

    fn list_chunk_ids<'a>(&'a self, filename: &'a str) -> StoreFuture<'a, Vec<u64>> {
        Box::pin(std::future::ready(self.list(filename)))
    }
}
