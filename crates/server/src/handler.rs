//! Per-operation request handlers.
//!
//! Each handler reads its request body from `reader`, consults the store
//! and writes the full response to `writer`. Errors returned to the caller
//! are for logging only; the remote peer has already been answered when
//! that was possible.

use std::time::Duration;

use sfs_protocol::{
    Chunk, StatusCode, WireError, read_chunk_frame, read_list_ids_request, read_recv_chunk_request,
    write_chunk_frame, write_id_list, write_status, write_status_with_message,
};
use sfs_storage::{ChunkBody, ChunkStore, StorageError};
use tokio::io::{AsyncRead, AsyncWrite, Take};
use tracing::debug;

use crate::ServerError;

/// Largest rejected chunk body the server reads through before answering.
pub const MAX_DRAIN_BYTES: u64 = 64 * 1024 * 1024;

/// How long the server keeps reading a rejected chunk body.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// `*`: decode a chunk frame and store it.
pub(crate) async fn send_chunk<S, R, W>(
    store: &S,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), ServerError>
where
    S: ChunkStore + ?Sized,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin,
{
    let chunk = match read_chunk_frame(&mut *reader).await {
        Ok(chunk) => chunk,
        Err(e) => return reject_malformed(writer, e).await,
    };

    let Chunk {
        id,
        filename,
        size,
        body: mut rest,
    } = chunk;
    let body = Box::pin(&mut rest) as ChunkBody<'_>;
    let chunk = Chunk::new(filename.clone(), id, size, body);

    match store.store_chunk(chunk).await {
        Ok(()) => {
            debug!(%filename, id, size, "chunk stored");
            write_status(writer, StatusCode::Ok).await?;
            Ok(())
        }
        Err(e) => {
            // The peer is still sending; unread body bytes would reset the
            // connection before it sees the answer.
            drain_body(&mut rest).await;
            backend_failure(writer, "store chunk", e).await
        }
    }
}

/// Discards what is left of a rejected chunk body, within
/// [`MAX_DRAIN_BYTES`] and [`DRAIN_TIMEOUT`].
async fn drain_body<R: AsyncRead + Unpin>(body: &mut Take<R>) {
    let left = body.limit();
    if left == 0 || left > MAX_DRAIN_BYTES {
        return;
    }
    let drained =
        tokio::time::timeout(DRAIN_TIMEOUT, tokio::io::copy(body, &mut tokio::io::sink())).await;
    match drained {
        Ok(Ok(n)) => debug!(drained = n, "discarded rejected chunk body"),
        Ok(Err(e)) => debug!("drain of rejected chunk body failed: {e}"),
        Err(_) => debug!(left = body.limit(), "drain of rejected chunk body timed out"),
    }
}

/// `/`: stream one stored chunk back to the peer.
pub(crate) async fn recv_chunk<S, R, W>(
    store: &S,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), ServerError>
where
    S: ChunkStore + ?Sized,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let req = match read_recv_chunk_request(reader).await {
        Ok(req) => req,
        Err(e) => return reject_malformed(writer, e).await,
    };

    match store.get_chunk(&req.filename, req.id).await {
        Ok(chunk) => {
            write_status(writer, StatusCode::Ok).await?;
            // The frame takes ownership; the store's handle is released
            // once the body has been fully written.
            write_chunk_frame(writer, chunk).await?;
            debug!(filename = %req.filename, id = req.id, "chunk served");
            Ok(())
        }
        Err(StorageError::NotFound) => {
            debug!(filename = %req.filename, id = req.id, "chunk not found");
            write_status(writer, StatusCode::NotFound).await?;
            Ok(())
        }
        Err(e) => backend_failure(writer, "get chunk", e).await,
    }
}

/// `%`: list chunk ids held for a file. An unknown file is an empty list.
pub(crate) async fn list_ids<S, R, W>(
    store: &S,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), ServerError>
where
    S: ChunkStore + ?Sized,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let req = match read_list_ids_request(reader).await {
        Ok(req) => req,
        Err(e) => return reject_malformed(writer, e).await,
    };

    let ids = match store.list_chunk_ids(&req.filename).await {
        Ok(ids) => ids,
        Err(StorageError::NotFound) => Vec::new(),
        Err(e) => return backend_failure(writer, "list chunk ids", e).await,
    };

    write_status(writer, StatusCode::Ok).await?;
    write_id_list(writer, &ids).await?;
    Ok(())
}

/// Answers a connection whose leading byte is not a known operation tag.
pub(crate) async fn unknown_tag<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
) -> Result<(), ServerError> {
    let msg = format!(
        "incorrect head character: {:?} (dec:{tag})",
        char::from(tag)
    );
    write_status_with_message(writer, StatusCode::InvalidRequest, &msg).await?;
    Err(ServerError::InvalidRequest(msg))
}

async fn reject_malformed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    err: WireError,
) -> Result<(), ServerError> {
    // Best effort: the peer may already be gone.
    let _ = write_status_with_message(writer, StatusCode::InvalidRequest, &err.to_string()).await;
    Err(err.into())
}

async fn backend_failure<W: AsyncWrite + Unpin>(
    writer: &mut W,
    op: &'static str,
    err: StorageError,
) -> Result<(), ServerError> {
    let code = match err {
        StorageError::InvalidName(_) => StatusCode::InvalidRequest,
        _ => StatusCode::Internal,
    };
    write_status_with_message(writer, code, &err.to_string()).await?;
    Err(ServerError::Backend { op, source: err })
}
