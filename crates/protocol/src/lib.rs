//! Wire protocol for SFS storage nodes.
//!
//! Every remote operation uses its own TCP connection. The client writes a
//! one-byte operation tag followed by the request body; the node answers
//! with a status code and, on success, an operation-specific payload.
//!
//! # Wire format
//!
//! All integers are 8-byte little-endian.
//!
//! ```text
//! CHUNK FRAME:
//!   [8 bytes: filename_len]
//!   [filename_len bytes: filename UTF-8]
//!   [8 bytes: chunk id]
//!   [8 bytes: body size]
//!   [size bytes: raw chunk body]
//!
//! '*' SEND CHUNK:   request = chunk frame
//!                   response = [status]
//! '/' RECV CHUNK:   request = [filename_len][filename][id]
//!                   response = [status], then chunk frame if Ok
//! '%' LIST IDS:     request = [filename_len][filename]
//!                   response = [status], then [count][id; count] if Ok
//!
//! STATUS WITH MESSAGE (InvalidRequest, Internal):
//!   [8 bytes: status][8 bytes: msg_len][msg_len bytes: msg UTF-8]
//! ```

pub mod chunk;
pub mod error;
pub mod frame;
pub mod request;
pub mod status;

pub use chunk::{Chunk, chunk_count};
pub use error::WireError;
pub use frame::{read_chunk_frame, read_filename, write_chunk_frame, write_filename};
pub use request::{
    ListIdsRequest, Op, RecvChunkRequest, read_id_list, read_list_ids_request, read_op_tag,
    read_recv_chunk_request, write_id_list, write_list_ids_request, write_op,
    write_recv_chunk_request,
};
pub use status::{
    StatusCode, read_message, read_status, write_status, write_status_with_message,
};

/// Upper bound on a filename accepted from the wire.
///
/// The length prefix is attacker-controlled; without a bound a single
/// frame could make the receiver allocate an arbitrary buffer.
pub const MAX_FILENAME_LEN: u64 = 4096;

/// Upper bound on a status message accepted from the wire.
pub const MAX_MESSAGE_LEN: u64 = 64 * 1024;

/// Upper bound on the number of ids preallocated when reading an inventory.
pub const MAX_ID_PREALLOC: u64 = 64 * 1024;

/// TCP read/write buffer size (256 KB).
pub const IO_BUFFER_SIZE: usize = 256 * 1024;
