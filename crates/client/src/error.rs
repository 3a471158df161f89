use sfs_chunkio::WindowError;
use sfs_protocol::{StatusCode, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection to {node} failed: {source}")]
    Connection {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("file not found")]
    NotFound,

    #[error("file chunks are incomplete: {expected} expected, missing {missing:?}")]
    IncompleteFile { expected: u64, missing: Vec<u64> },

    /// The node answered with an error status and message.
    #[error("{node} answered {code}: {message}")]
    Remote {
        node: String,
        code: StatusCode,
        message: String,
    },

    #[error("chunk {id} on {node}: {source}")]
    Chunk {
        id: u64,
        node: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("{} operations failed; first: {}", .0.len(), .0[0])]
    Aggregate(Vec<ClientError>),

    #[error("closing connection to {node} failed: {source}")]
    Close {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out talking to {node}")]
    Timeout { node: String },

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("no storage nodes configured")]
    NoNodes,

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Returns this error followed by every error nested inside it.
    pub fn flatten(&self) -> Vec<&ClientError> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a ClientError>) {
        out.push(self);
        match self {
            ClientError::Chunk { source, .. } => source.collect_into(out),
            ClientError::Aggregate(errors) => {
                for e in errors {
                    e.collect_into(out);
                }
            }
            _ => {}
        }
    }

    pub fn is_connection(&self) -> bool {
        self.flatten()
            .iter()
            .any(|e| matches!(e, ClientError::Connection { .. }))
    }
}

/// Folds collected failures: none is success, one is returned as is, more
/// are wrapped in [`ClientError::Aggregate`] in the order given.
pub(crate) fn aggregate(mut errors: Vec<ClientError>) -> Result<(), ClientError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ClientError::Aggregate(errors)),
    }
}
