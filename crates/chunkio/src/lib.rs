//! Windowed chunk I/O.
//!
//! A window is a `[start, limit)` byte range over a random-access source
//! or sink. Reading a window yields exactly its bytes and then EOF; writing
//! a window commits bytes only inside its range. Windows let a chunk be
//! streamed without loading the whole file into memory, and let several
//! chunks be written into one sink concurrently.

mod reader;
mod source;
mod writer;

pub use reader::{WindowReader, split, split_file};
pub use source::{MemorySink, ReadAt, WriteAt};
pub use writer::{WindowWriter, WriteOutcome, write_chunks};

/// Errors produced by windowed I/O.
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The window has no room left.
    #[error("end of window")]
    EndOfWindow,

    #[error("invalid chunk size: {0} (must be at least 1)")]
    InvalidChunkSize(u64),

    /// A chunk body ended before filling its window.
    #[error("chunk {id}: body ended after {written} of {expected} bytes")]
    ShortChunk { id: u64, written: u64, expected: u64 },

    #[error("chunk {id}: {source}")]
    Chunk {
        id: u64,
        #[source]
        source: Box<WindowError>,
    },

    #[error("{} chunk writes failed; first: {}", .0.len(), .0[0])]
    Aggregate(Vec<WindowError>),
}
