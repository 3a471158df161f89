//! The chunk: unit of transfer and storage.

/// A bounded slice of a file's bytes, identified by `(filename, id)`.
///
/// `body` is a sequential source that yields exactly `size` bytes once.
/// On the sending side it is usually a window over a local file; on the
/// receiving side it is a bounded reader over the connection.
#[derive(Debug)]
pub struct Chunk<B> {
    /// 0-based position of the chunk within its file.
    pub id: u64,
    /// Logical file name the chunk belongs to.
    pub filename: String,
    /// Body length in bytes.
    pub size: u64,
    pub body: B,
}

impl<B> Chunk<B> {
    pub fn new(filename: impl Into<String>, id: u64, size: u64, body: B) -> Self {
        Self {
            id,
            filename: filename.into(),
            size,
            body,
        }
    }

    /// Replaces the body, keeping the chunk identity and size.
    pub fn map_body<C>(self, f: impl FnOnce(B) -> C) -> Chunk<C> {
        Chunk {
            id: self.id,
            filename: self.filename,
            size: self.size,
            body: f(self.body),
        }
    }
}

/// Number of chunks a file of `total_size` bytes splits into.
///
/// `chunk_size` must be at least 1.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
    total_size.div_ceil(chunk_size)
}
