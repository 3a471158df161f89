//! Error types for the wire protocol.

use crate::MAX_FILENAME_LEN;

/// Errors produced while encoding or decoding wire structures.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The underlying stream failed while writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a malformed or truncated structure.
    #[error("decode error: {0}")]
    Decode(String),

    /// The peer sent a well-formed value the protocol does not define.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("filename too long: {0} bytes (max {MAX_FILENAME_LEN})")]
    FilenameTooLong(usize),

    #[error("chunk body ended after {written} of {expected} bytes")]
    ShortBody { written: u64, expected: u64 },
}

impl WireError {
    /// Wraps a read failure as a decode error naming the field being read.
    pub(crate) fn read(field: &str, err: std::io::Error) -> Self {
        WireError::Decode(format!("can't read {field}: {err}"))
    }
}
