//! Storage node server.
//!
//! A [`NodeServer`] accepts TCP connections, reads one operation tag per
//! connection and dispatches to the matching handler, which talks to a
//! [`ChunkStore`](sfs_storage::ChunkStore).

mod error;
mod handler;
mod server;

pub use error::ServerError;
pub use handler::{DRAIN_TIMEOUT, MAX_DRAIN_BYTES};
pub use server::{NodeServer, ServerConfig};
