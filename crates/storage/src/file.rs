use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sfs_protocol::Chunk;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::validation::{CHUNK_DIR, validate_filename};
use crate::{ChunkBody, ChunkStore, StorageError, StoreFuture, StoredChunk};

/// Stores each chunk at `<root>/<filename>/.chunks/<id>`.
///
/// Chunk files live in their own `.chunks` directory so that a file named
/// `a/0` never collides with chunk 0 of file `a`. Bodies are written to a hidden temporary file next to their final
/// location and renamed into place once complete, so a reader sees either
/// the previous body or the new one.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_dir(&self, filename: &str) -> Result<PathBuf, StorageError> {
        validate_filename(filename)?;
        Ok(self.root.join(filename).join(CHUNK_DIR))
    }

    async fn store(&self, chunk: Chunk<ChunkBody<'_>>) -> Result<(), StorageError> {
        let dir = self.chunk_dir(&chunk.filename)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(format!("can't create {}", dir.display()), e))?;

        let final_path = dir.join(chunk.id.to_string());
        let tmp_path = dir.join(format!(".{}.{}.tmp", chunk.id, Uuid::new_v4().simple()));

        let result = write_body(&tmp_path, chunk.body, chunk.size).await;
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        if written < chunk.size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::ShortBody {
                filename: chunk.filename,
                id: chunk.id,
                written,
                expected: chunk.size,
            });
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::io(
                format!("can't move chunk into {}", final_path.display()),
                e,
            ));
        }

        debug!(path = %final_path.display(), size = chunk.size, "chunk stored");
        Ok(())
    }

    async fn open(&self, filename: &str, id: u64) -> Result<StoredChunk, StorageError> {
        let path = self.chunk_dir(filename)?.join(id.to_string());

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(e) => {
                return Err(StorageError::io(
                    format!("can't open {}", path.display()),
                    e,
                ));
            }
        };

        let meta = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(format!("can't stat {}", path.display()), e))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound);
        }

        let size = meta.len();
        let body: ChunkBody<'static> = Box::pin(file.take(size));
        Ok(Chunk::new(filename, id, size, body))
    }

    async fn list(&self, filename: &str) -> Result<Vec<u64>, StorageError> {
        let dir = self.chunk_dir(filename)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(e) => {
                return Err(StorageError::io(
                    format!("can't read {}", dir.display()),
                    e,
                ));
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(format!("can't read {}", dir.display()), e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // In-flight writes.
            if name.starts_with('.') {
                continue;
            }

            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            match name.parse::<u64>() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(
                    dir = %dir.display(),
                    entry = %name,
                    "skipping non-numeric entry in chunk directory"
                ),
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }
}

async fn write_body(path: &Path, body: ChunkBody<'_>, size: u64) -> Result<u64, StorageError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| StorageError::io(format!("can't create {}", path.display()), e))?;

    let mut body = body.take(size);
    let written = tokio::io::copy(&mut body, &mut file)
        .await
        .map_err(|e| StorageError::io(format!("can't write {}", path.display()), e))?;

    file.flush()
        .await
        .map_err(|e| StorageError::io(format!("can't flush {}", path.display()), e))?;

    Ok(written)
}

impl ChunkStore for FileStore {
    fn store_chunk<'a>(&'a self, chunk: Chunk<ChunkBody<'a>>) -> StoreFuture<'a, ()> {
        Box::pin(self.store(chunk))
    }

    fn get_chunk<'a>(&'a self, filename: &'a str, id: u64) -> StoreFuture<'a, StoredChunk> {
        Box::pin(self.open(filename, id))
    }

    fn list_chunk_ids<'a>(&'a self, filename: &'a str) -> StoreFuture<'a, Vec<u64>> {
        Box::pin(self.list(filename))
    }
}
