//! Operation tags and request/response bodies other than chunk frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_ID_PREALLOC;
use crate::error::WireError;
use crate::frame::{read_filename, read_u64, write_filename};

/// Remote operation selected by the leading tag byte of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `*`: store the chunk frame that follows.
    SendChunk,
    /// `/`: return one stored chunk.
    RecvChunk,
    /// `%`: list the chunk ids stored for a file.
    ListIds,
}

impl Op {
    pub const fn tag(self) -> u8 {
        match self {
            Self::SendChunk => b'*',
            Self::RecvChunk => b'/',
            Self::ListIds => b'%',
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'*' => Some(Self::SendChunk),
            b'/' => Some(Self::RecvChunk),
            b'%' => Some(Self::ListIds),
            _ => None,
        }
    }
}

/// Body of a `/` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvChunkRequest {
    pub filename: String,
    pub id: u64,
}

/// Body of a `%` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListIdsRequest {
    pub filename: String,
}

/// Writes the operation tag byte.
pub async fn write_op<W: AsyncWrite + Unpin>(writer: &mut W, op: Op) -> Result<(), WireError> {
    writer.write_u8(op.tag()).await?;
    Ok(())
}

/// Reads the raw tag byte; unknown tags are left to the caller to reject.
pub async fn read_op_tag<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, WireError> {
    reader
        .read_u8()
        .await
        .map_err(|e| WireError::read("operation tag", e))
}

pub async fn write_recv_chunk_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    req: &RecvChunkRequest,
) -> Result<(), WireError> {
    write_filename(writer, &req.filename).await?;
    writer.write_u64_le(req.id).await?;
    Ok(())
}

pub async fn read_recv_chunk_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<RecvChunkRequest, WireError> {
    let filename = read_filename(reader).await?;
    let id = read_u64(reader, "chunk id").await?;
    Ok(RecvChunkRequest { filename, id })
}

pub async fn write_list_ids_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    req: &ListIdsRequest,
) -> Result<(), WireError> {
    write_filename(writer, &req.filename).await
}

pub async fn read_list_ids_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<ListIdsRequest, WireError> {
    let filename = read_filename(reader).await?;
    Ok(ListIdsRequest { filename })
}

/// Writes `[count][id; count]`.
pub async fn write_id_list<W: AsyncWrite + Unpin>(
    writer: &mut W,
    ids: &[u64],
) -> Result<(), WireError> {
    writer.write_u64_le(ids.len() as u64).await?;
    for id in ids {
        writer.write_u64_le(*id).await?;
    }
    Ok(())
}

/// Reads `[count][id; count]`.
pub async fn read_id_list<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u64>, WireError> {
    let count = read_u64(reader, "id count").await?;

    let mut ids = Vec::with_capacity(count.min(MAX_ID_PREALLOC) as usize);
    for i in 0..count {
        let id = read_u64(reader, &format!("id #{i}")).await?;
        ids.push(id);
    }
    Ok(ids)
}
