use std::net::SocketAddr;

use sfs_protocol::WireError;
use sfs_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("can't bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Fatal for the listener.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: StorageError,
    },
}
