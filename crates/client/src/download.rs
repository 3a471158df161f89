use std::collections::BTreeSet;
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use sfs_protocol::Chunk;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

use crate::ClientError;
use crate::error::aggregate;
use crate::transport::ChunkStream;

/// Checks that `ids` is exactly `{0, 1, .., n-1}` and returns `n`.
///
/// No ids at all means the file does not exist. Only the first few missing
/// ids are reported.
pub fn check_density(ids: impl IntoIterator<Item = u64>) -> Result<u64, ClientError> {
    const MAX_REPORTED: usize = 16;

    let ids: BTreeSet<u64> = ids.into_iter().collect();
    let Some(&last) = ids.last() else {
        return Err(ClientError::NotFound);
    };

    let expected = last.saturating_add(1);
    if ids.len() as u64 == expected {
        return Ok(expected);
    }

    let mut missing = Vec::new();
    let mut next = 0;
    for &id in &ids {
        while next < id && missing.len() < MAX_REPORTED {
            missing.push(next);
            next += 1;
        }
        next = id.saturating_add(1);
    }

    Err(ClientError::IncompleteFile { expected, missing })
}

#[derive(Debug)]
struct Part {
    node: String,
    id: u64,
    body: ChunkStream,
}

/// A file being streamed back from the cluster.
///
/// Reading yields the chunk bodies concatenated in id order, once. Every
/// chunk already holds an open connection; [`close`](Self::close) releases
/// all of them and reports any failure to do so.
#[derive(Debug)]
pub struct Download {
    filename: String,
    size: u64,
    parts: Vec<Part>,
    current: usize,
}

impl Download {
    /// `chunks` must be ordered by id.
    pub(crate) fn new(filename: &str, chunks: Vec<(String, Chunk<ChunkStream>)>) -> Self {
        let size = chunks.iter().map(|(_, c)| c.size).sum();
        let parts = chunks
            .into_iter()
            .map(|(node, chunk)| Part {
                node,
                id: chunk.id,
                body: chunk.body,
            })
            .collect();

        Self {
            filename: filename.to_string(),
            size,
            parts,
            current: 0,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Total byte count (sum of chunk sizes).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_count(&self) -> usize {
        self.parts.len()
    }

    /// Shuts down every underlying connection, collecting all failures.
    pub async fn close(self) -> Result<(), ClientError> {
        let mut errors = Vec::new();
        for part in self.parts {
            let mut stream = part.body.into_inner().into_inner();
            match stream.shutdown().await {
                Ok(()) => {}
                // The node already closed its end.
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(source) => errors.push(ClientError::Close {
                    node: part.node,
                    source,
                }),
            }
        }
        aggregate(errors)
    }
}

impl AsyncRead for Download {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let this = &mut *self;
        while let Some(part) = this.parts.get_mut(this.current) {
            let before = buf.filled().len();
            ready!(Pin::new(&mut part.body).poll_read(cx, buf))?;
            if buf.filled().len() > before {
                return Poll::Ready(Ok(()));
            }

            if part.body.limit() > 0 {
                return Poll::Ready(Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!(
                        "chunk {} from {} ended {} bytes early",
                        part.id,
                        part.node,
                        part.body.limit()
                    ),
                )));
            }
            this.current += 1;
        }

        Poll::Ready(Ok(()))
    }
}
