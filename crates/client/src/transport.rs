//! One remote operation per TCP connection.

use std::future::Future;
use std::time::Duration;

use sfs_protocol::{
    Chunk, IO_BUFFER_SIZE, ListIdsRequest, Op, RecvChunkRequest, StatusCode, WireError,
    read_chunk_frame, read_id_list, read_message, read_status, write_chunk_frame,
    write_list_ids_request, write_op, write_recv_chunk_request,
};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, BufWriter, Take};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ClientError;
use crate::config::DEFAULT_CONNECT_TIMEOUT;

/// Body of a chunk received from a node.
///
/// Reads stop at the chunk boundary. The connection stays open until the
/// stream is dropped or shut down.
pub type ChunkStream = Take<BufReader<TcpStream>>;

/// Dials a fresh connection for every operation.
#[derive(Debug, Clone)]
pub struct NodeTransport {
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
}

impl Default for NodeTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, None)
    }
}

impl NodeTransport {
    pub fn new(connect_timeout: Duration, io_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    /// Stores one chunk on `node`, streaming its body.
    pub async fn send_chunk<B>(
        &self,
        node: &str,
        chunk: Chunk<B>,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError>
    where
        B: AsyncRead + Unpin + Send,
    {
        let mut stream = self.dial(node, cancel).await?;
        let (id, size) = (chunk.id, chunk.size);

        self.guarded(node, cancel, async {
            let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, &mut stream);
            write_op(&mut writer, Op::SendChunk).await?;
            write_chunk_frame(&mut writer, chunk).await?;
            writer.flush().await?;
            drop(writer);

            expect_ok(node, &mut stream).await
        })
        .await?;

        debug!(node, id, size, "chunk sent");
        Ok(())
    }

    /// Lists the chunk ids `node` holds for `filename`.
    pub async fn list_chunk_ids(
        &self,
        node: &str,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u64>, ClientError> {
        let mut stream = self.dial(node, cancel).await?;

        self.guarded(node, cancel, async {
            let req = ListIdsRequest {
                filename: filename.to_string(),
            };
            let mut writer = BufWriter::new(&mut stream);
            write_op(&mut writer, Op::ListIds).await?;
            write_list_ids_request(&mut writer, &req).await?;
            writer.flush().await?;
            drop(writer);

            let mut reader = BufReader::new(&mut stream);
            expect_ok(node, &mut reader).await?;
            let ids = read_id_list(&mut reader).await?;
            Ok::<_, ClientError>(ids)
        })
        .await
    }

    /// Fetches one chunk from `node`.
    ///
    /// The returned body streams straight off the connection; the caller
    /// must drain it and then drop or shut it down to release the socket.
    pub async fn recv_chunk(
        &self,
        node: &str,
        filename: &str,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Chunk<ChunkStream>, ClientError> {
        let mut stream = self.dial(node, cancel).await?;

        let chunk = self
            .guarded(node, cancel, async move {
                let req = RecvChunkRequest {
                    filename: filename.to_string(),
                    id,
                };
                let mut writer = BufWriter::new(&mut stream);
                write_op(&mut writer, Op::RecvChunk).await?;
                write_recv_chunk_request(&mut writer, &req).await?;
                writer.flush().await?;
                drop(writer);

                let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, stream);
                expect_ok(node, &mut reader).await?;
                let chunk = read_chunk_frame(reader).await?;
                Ok::<_, ClientError>(chunk)
            })
            .await?;

        if chunk.id != id || chunk.filename != filename {
            return Err(ClientError::Protocol(format!(
                "asked {node} for chunk {id} of {filename}, got chunk {} of {}",
                chunk.id, chunk.filename
            )));
        }

        debug!(node, id, size = chunk.size, "chunk received");
        Ok(chunk)
    }

    async fn dial(&self, node: &str, cancel: &CancellationToken) -> Result<TcpStream, ClientError> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ClientError::Cancelled);
            }
            result = tokio::time::timeout(self.connect_timeout, TcpStream::connect(node)) => {
                match result {
                    Ok(Ok(s)) => s,
                    Ok(Err(source)) => {
                        return Err(ClientError::Connection {
                            node: node.to_string(),
                            source,
                        });
                    }
                    Err(_) => {
                        return Err(ClientError::Timeout {
                            node: node.to_string(),
                        });
                    }
                }
            }
        };

        stream
            .set_nodelay(true)
            .map_err(|source| ClientError::Connection {
                node: node.to_string(),
                source,
            })?;
        Ok(stream)
    }

    /// Runs one request/response exchange under cancellation and the
    /// optional I/O timeout. Stream failures are reported as connection
    /// errors against `node`.
    async fn guarded<T, F>(
        &self,
        node: &str,
        cancel: &CancellationToken,
        exchange: F,
    ) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let bounded = async {
            match self.io_timeout {
                Some(limit) => match tokio::time::timeout(limit, exchange).await {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::Timeout {
                        node: node.to_string(),
                    }),
                },
                None => exchange.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = bounded => result,
        };

        result.map_err(|e| match e {
            ClientError::Wire(WireError::Io(source)) | ClientError::Io(source) => {
                ClientError::Connection {
                    node: node.to_string(),
                    source,
                }
            }
            other => other,
        })
    }
}

/// Reads a status and turns anything but `Ok` into an error.
async fn expect_ok<R: AsyncRead + Unpin>(node: &str, reader: &mut R) -> Result<(), ClientError> {
    match read_status(reader).await? {
        StatusCode::Ok => Ok(()),
        StatusCode::NotFound => Err(ClientError::NotFound),
        code @ (StatusCode::InvalidRequest | StatusCode::Internal) => {
            let message = read_message(reader).await?;
            Err(ClientError::Remote {
                node: node.to_string(),
                code,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use sfs_server::{NodeServer, ServerConfig};
    use sfs_storage::MemoryStore;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn node() -> (Arc<NodeServer<MemoryStore>>, String) {
        let config = ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
        };
        let server = NodeServer::new(config, Arc::new(MemoryStore::new()));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let s = Arc::clone(&server);
        tokio::spawn(async move { s.serve(listener).await });
        (server, addr)
    }

    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn send_list_recv() {
        let (server, addr) = node().await;
        let transport = NodeTransport::default();
        let cancel = CancellationToken::new();

        transport
            .send_chunk(&addr, Chunk::new("f", 2, 3, &b"two"[..]), &cancel)
            .await
            .unwrap();
        transport
            .send_chunk(&addr, Chunk::new("f", 0, 4, &b"zero"[..]), &cancel)
            .await
            .unwrap();

        let ids = transport.list_chunk_ids(&addr, "f", &cancel).await.unwrap();
        assert_eq!(ids, vec![0, 2]);

        let mut chunk = transport.recv_chunk(&addr, "f", 2, &cancel).await.unwrap();
        let mut body = Vec::new();
        chunk.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"two");

        server.shutdown();
    }

    #[tokio::test]
    async fn unknown_file_lists_empty() {
        let (server, addr) = node().await;
        let ids = NodeTransport::default()
            .list_chunk_ids(&addr, "ghost", &CancellationToken::new())
            .await
            .unwrap();
        assert!(ids.is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn missing_chunk_is_not_found() {
        let (server, addr) = node().await;
        let err = NodeTransport::default()
            .recv_chunk(&addr, "ghost", 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound), "{err}");
        server.shutdown();
    }

    #[tokio::test]
    async fn invalid_name_is_remote_error() {
        let (server, addr) = node().await;
        let err = NodeTransport::default()
            .send_chunk(
                &addr,
                Chunk::new("../escape", 0, 1, &b"x"[..]),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                ClientError::Remote {
                    code: StatusCode::InvalidRequest,
                    ..
                }
            ),
            "{err}"
        );
        server.shutdown();
    }

    #[tokio::test]
    async fn large_rejected_chunk_still_gets_remote_error() {
        let (server, addr) = node().await;
        let body = vec![0u8; 8 * 1024 * 1024];
        let err = NodeTransport::default()
            .send_chunk(
                &addr,
                Chunk::new("../escape", 0, body.len() as u64, body.as_slice()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                ClientError::Remote {
                    code: StatusCode::InvalidRequest,
                    ref message,
                    ..
                } if message.contains("escape")
            ),
            "{err}"
        );
        server.shutdown();
    }

    #[tokio::test]
    async fn refused_dial_is_connection_error() {
        let addr = closed_port().await;
        let err = NodeTransport::default()
            .list_chunk_ids(&addr, "f", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connection { ref node, .. } if *node == addr));
    }

    #[tokio::test]
    async fn cancelled_before_dial() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = NodeTransport::default()
            .list_chunk_ids("127.0.0.1:9", "f", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }

    #[tokio::test]
    async fn io_timeout_applies_to_silent_node() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let transport = NodeTransport::new(DEFAULT_CONNECT_TIMEOUT, Some(Duration::from_millis(100)));
        let err = transport
            .list_chunk_ids(&addr, "f", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }), "{err}");
    }
}
