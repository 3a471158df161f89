//! SFS client.
//!
//! Files are split into fixed-size chunks; each chunk lives on exactly one
//! node chosen by [`place`]. [`Client::upload`] fans chunks out to their
//! nodes concurrently and [`Client::download`] discovers, fetches and
//! concatenates them again in id order.

mod client;
mod config;
mod download;
mod error;
mod placement;
mod transport;

pub use client::Client;
pub use config::{ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT, parse_nodes};
pub use download::{Download, check_density};
pub use error::ClientError;
pub use placement::place;
pub use transport::{ChunkStream, NodeTransport};
