//! Chunk storage backends.
//!
//! A node persists chunks through the [`ChunkStore`] trait. Two backends
//! are provided: [`FileStore`] keeps one directory per file and one file
//! per chunk, [`MemoryStore`] keeps everything in a map.

mod file;
mod memory;
mod validation;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sfs_protocol::Chunk;
use tokio::io::AsyncRead;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use validation::validate_filename;

/// A chunk body borrowed from wherever it is being read.
pub type ChunkBody<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;

/// A chunk handed out by a store.
///
/// The body owns whatever the store opened to serve it (a file handle, a
/// buffer); dropping the chunk releases it.
pub type StoredChunk = Chunk<ChunkBody<'static>>;

/// A boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Errors produced by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The chunk, or the whole file, is absent.
    #[error("not found")]
    NotFound,

    #[error("invalid filename: {0}")]
    InvalidName(String),

    #[error("chunk {id} of {filename}: body ended after {written} of {expected} bytes")]
    ShortBody {
        filename: String,
        id: u64,
        written: u64,
        expected: u64,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}

/// Persistent chunk storage keyed by `(filename, id)`.
///
/// Storing a chunk under an identity that already exists replaces it as a
/// whole; readers never observe a mix of two bodies.
pub trait ChunkStore: Send + Sync + 'static {
    /// Consumes `chunk.size` bytes of the body and persists them.
    fn store_chunk<'a>(&'a self, chunk: Chunk<ChunkBody<'a>>) -> StoreFuture<'a, ()>;

    /// Opens a stored chunk. Missing chunks are [`StorageError::NotFound`].
    fn get_chunk<'a>(&'a self, filename: &'a str, id: u64) -> StoreFuture<'a, StoredChunk>;

    /// Lists stored chunk ids for `filename` in ascending order.
    ///
    /// A file with no chunks at all is [`StorageError::NotFound`].
    fn list_chunk_ids<'a>(&'a self, filename: &'a str) -> StoreFuture<'a, Vec<u64>>;
}

impl<T: ChunkStore + ?Sized> ChunkStore for Arc<T> {
    fn store_chunk<'a>(&'a self, chunk: Chunk<ChunkBody<'a>>) -> StoreFuture<'a, ()> {
        (**self).store_chunk(chunk)
    }

    fn get_chunk<'a>(&'a self, filename: &'a str, id: u64) -> StoreFuture<'a, StoredChunk> {
        (**self).get_chunk(filename, id)
    }

    fn list_chunk_ids<'a>(&'a self, filename: &'a str) -> StoreFuture<'a, Vec<u64>> {
        (**self).list_chunk_ids(filename)
    }
}
