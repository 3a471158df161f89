//! Listener lifecycle and per-connection dispatch.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use sfs_protocol::{IO_BUFFER_SIZE, Op, read_op_tag};
use sfs_storage::ChunkStore;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ServerError;
use crate::handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 0).into(),
        }
    }
}

/// A storage node.
///
/// Every accepted connection carries exactly one operation and is handled
/// on its own task; a failing connection never affects the listener or
/// its siblings.
pub struct NodeServer<S: ChunkStore> {
    config: ServerConfig,
    store: Arc<S>,
    cancel: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
}

impl<S: ChunkStore> NodeServer<S> {
    pub fn new(config: ServerConfig, store: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            cancel: CancellationToken::new(),
            local_addr: OnceLock::new(),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the address the server is listening on.
    ///
    /// Only available after [`bind`](Self::bind).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Stops the accept loop. Connections already being handled finish on
    /// their own.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let local_addr = listener.local_addr()?;
        let _ = self.local_addr.set(local_addr);
        info!(%local_addr, "storage node listening");
        Ok(listener)
    }

    /// Binds and serves until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    ///
    /// Returns `Ok` after shutdown, or [`ServerError::Accept`] if the
    /// listener itself fails.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("storage node shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("accept error: {e}");
                            break Err(ServerError::Accept(e));
                        }
                    };

                    debug!(%peer_addr, "connection accepted");
                    let server = Arc::clone(self);
                    tokio::spawn(async move {
                        match server.handle_connection(stream, peer_addr).await {
                            Ok(()) => {}
                            Err(e @ ServerError::Backend { .. }) => {
                                error!(%peer_addr, "request failed: {e}");
                            }
                            Err(e) => {
                                warn!(%peer_addr, "connection error: {e}");
                            }
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let trace_id = Uuid::new_v4();
        let started = Instant::now();

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, reader);
        let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, writer);

        let tag = read_op_tag(&mut reader).await?;
        let store = &*self.store;
        let result = match Op::from_tag(tag) {
            Some(Op::SendChunk) => handler::send_chunk(store, &mut reader, &mut writer).await,
            Some(Op::RecvChunk) => handler::recv_chunk(store, &mut reader, &mut writer).await,
            Some(Op::ListIds) => handler::list_ids(store, &mut reader, &mut writer).await,
            None => handler::unknown_tag(&mut writer, tag).await,
        };

        // Whatever the handler managed to write still goes out.
        let flushed = writer.flush().await;
        let _ = writer.shutdown().await;

        info!(
            op = %char::from(tag),
            %trace_id,
            %peer_addr,
            elapsed = ?started.elapsed(),
            ok = result.is_ok(),
            "request handled"
        );

        result?;
        flushed?;
        Ok(())
    }
}
