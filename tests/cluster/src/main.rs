fn main() {
    println!("Run `cargo test -p cluster-tests` to execute the multi-node tests.");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use sfs_chunkio::{MemorySink, split};
    use sfs_client::{Client, ClientConfig, ClientError, NodeTransport, check_density, place};
    use sfs_protocol::{
        Chunk, Op, StatusCode, read_chunk_frame, read_message, read_status, write_chunk_frame,
        write_op,
    };
    use sfs_server::{NodeServer, ServerConfig};
    use sfs_storage::{
        ChunkBody, ChunkStore, FileStore, MemoryStore, StoreFuture, StoredChunk,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    /// Nodes backed by on-disk stores in a temporary directory.
    struct Cluster {
        _dir: tempfile::TempDir,
        servers: Vec<Arc<NodeServer<FileStore>>>,
        nodes: Vec<String>,
    }

    impl Cluster {
        async fn start(n: usize) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = Vec::new();
            let mut nodes = Vec::new();

            for i in 0..n {
                let store = Arc::new(FileStore::new(dir.path().join(format!("node{i}"))));
                let (server, addr) = spawn_node(store).await;
                servers.push(server);
                nodes.push(addr);
            }

            Self {
                _dir: dir,
                servers,
                nodes,
            }
        }

        fn client(&self, chunk_size: u64) -> Client {
            Client::new(ClientConfig {
                chunk_size,
                ..ClientConfig::with_nodes(self.nodes.clone())
            })
        }
    }

    impl Drop for Cluster {
        fn drop(&mut self) {
            for server in &self.servers {
                server.shutdown();
            }
        }
    }

    async fn spawn_node<S: ChunkStore>(store: Arc<S>) -> (Arc<NodeServer<S>>, String) {
        let config = ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
        };
        let server = NodeServer::new(config, store);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let s = Arc::clone(&server);
        tokio::spawn(async move { s.serve(listener).await });
        (server, addr)
    }

    async fn unreachable_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ 0x5a).collect()
    }

    async fn read_all(client: &Client, filename: &str) -> Vec<u8> {
        let cancel = CancellationToken::new();
        let mut download = client.download(filename, &cancel).await.unwrap();
        let mut out = Vec::new();
        download.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len() as u64, download.size());
        download.close().await.unwrap();
        out
    }

    #[tokio::test]
    async fn end_to_end_three_nodes() {
        let cluster = Cluster::start(3).await;
        let client = cluster.client(1000);
        let cancel = CancellationToken::new();
        let data = content(2500);

        client
            .upload("e2e.bin", Arc::new(data.clone()), 2500, &cancel)
            .await
            .unwrap();

        // Each node holds exactly the chunks placement assigned to it.
        let sizes = [1000u64, 1000, 500];
        for (server, node) in cluster.servers.iter().zip(&cluster.nodes) {
            let expected: Vec<u64> = (0..3)
                .filter(|&id| place("e2e.bin", id, &cluster.nodes) == node.as_str())
                .collect();
            let held = match server.store().list_chunk_ids("e2e.bin").await {
                Ok(ids) => ids,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => panic!("listing {node}: {e}"),
            };
            assert_eq!(held, expected, "inventory of {node}");

            for id in held {
                let chunk = server.store().get_chunk("e2e.bin", id).await.unwrap();
                assert_eq!(chunk.size, sizes[id as usize]);
            }
        }

        let out = read_all(&client, "e2e.bin").await;
        assert_eq!(out.len(), 2500);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn download_to_positional_sink() {
        let cluster = Cluster::start(3).await;
        let client = cluster.client(333);
        let cancel = CancellationToken::new();
        let data = content(10_000);

        client
            .upload("sink.bin", Arc::new(data.clone()), 10_000, &cancel)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let file = std::fs::File::create(&path).unwrap();
        let written = client
            .download_to("sink.bin", Arc::new(file), &cancel)
            .await
            .unwrap();

        assert_eq!(written, 10_000);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    /// Serves `get_chunk` later for lower ids and records completion order.
    struct SlowStore {
        inner: MemoryStore,
        served: Mutex<Vec<u64>>,
    }

    impl ChunkStore for SlowStore {
        fn store_chunk<'a>(&'a self, chunk: Chunk<ChunkBody<'a>>) -> StoreFuture<'a, ()> {
            self.inner.store_chunk(chunk)
        }

        fn get_chunk<'a>(&'a self, filename: &'a str, id: u64) -> StoreFuture<'a, StoredChunk> {
            Box::pin(async move {
                let delay = 300u64.saturating_sub(id * 150);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let chunk = self.inner.get_chunk(filename, id).await;
                self.served.lock().unwrap().push(id);
                chunk
            })
        }

        fn list_chunk_ids<'a>(&'a self, filename: &'a str) -> StoreFuture<'a, Vec<u64>> {
            self.inner.list_chunk_ids(filename)
        }
    }

    #[tokio::test]
    async fn reassembles_in_id_order_when_nodes_answer_out_of_order() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            served: Mutex::new(Vec::new()),
        });
        let (server, addr) = spawn_node(Arc::clone(&store)).await;
        let client = Client::new(ClientConfig {
            chunk_size: 1000,
            ..ClientConfig::with_nodes([addr])
        });
        let data = content(2500);

        client
            .upload("ooo.bin", Arc::new(data.clone()), 2500, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(read_all(&client, "ooo.bin").await, data);
        assert_eq!(*store.served.lock().unwrap(), vec![2, 1, 0]);
        server.shutdown();
    }

    #[tokio::test]
    async fn unreachable_node_fails_discovery() {
        let cluster = Cluster::start(2).await;
        let cancel = CancellationToken::new();
        let data = content(3000);

        cluster
            .client(500)
            .upload("partial.bin", Arc::new(data), 3000, &cancel)
            .await
            .unwrap();

        let dead = unreachable_addr().await;
        let mut nodes = cluster.nodes.clone();
        nodes.push(dead.clone());
        let client = Client::new(ClientConfig::with_nodes(nodes));

        let err = client.download("partial.bin", &cancel).await.unwrap_err();
        match err {
            ClientError::Connection { node, .. } => assert_eq!(node, dead),
            other => panic!("expected connection error, got {other}"),
        }
    }

    #[tokio::test]
    async fn upload_reports_every_failed_chunk() {
        let cluster = Cluster::start(1).await;
        let dead = unreachable_addr().await;
        let nodes = vec![cluster.nodes[0].clone(), dead.clone()];
        let client = Client::new(ClientConfig {
            chunk_size: 10,
            ..ClientConfig::with_nodes(nodes.clone())
        });

        let err = client
            .upload("half.bin", Arc::new(content(200)), 200, &CancellationToken::new())
            .await
            .unwrap_err();

        let expected_failures: Vec<u64> = (0..20)
            .filter(|&id| place("half.bin", id, &nodes) == dead)
            .collect();
        assert!(!expected_failures.is_empty());

        let failed: Vec<u64> = err
            .flatten()
            .into_iter()
            .filter_map(|e| match e {
                ClientError::Chunk { id, node, .. } => {
                    assert_eq!(*node, dead);
                    Some(*id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(failed, expected_failures);
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn missing_chunk_makes_file_incomplete() {
        let cluster = Cluster::start(1).await;
        let client = cluster.client(100);
        let cancel = CancellationToken::new();

        client
            .upload("gap.bin", Arc::new(content(450)), 450, &cancel)
            .await
            .unwrap();

        let chunk_path = cluster.servers[0].store().root().join("gap.bin/.chunks/2");
        std::fs::remove_file(chunk_path).unwrap();

        let err = client.download("gap.bin", &cancel).await.unwrap_err();
        match err {
            ClientError::IncompleteFile { expected, missing } => {
                assert_eq!(expected, 5);
                assert_eq!(missing, vec![2]);
            }
            other => panic!("expected incomplete file, got {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let cluster = Cluster::start(3).await;
        let err = cluster
            .client(100)
            .download("nothing-here", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound), "{err}");
    }

    #[tokio::test]
    async fn concurrent_chunks_to_one_node_stay_isolated() {
        let cluster = Cluster::start(1).await;
        let node = cluster.nodes[0].clone();
        let transport = NodeTransport::default();
        let cancel = CancellationToken::new();

        let zero = vec![b'0'; 512 * 1024];
        let one = vec![b'1'; 300 * 1024];
        let (a, b) = tokio::join!(
            transport.send_chunk(
                &node,
                Chunk::new("same.bin", 0, zero.len() as u64, zero.as_slice()),
                &cancel
            ),
            transport.send_chunk(
                &node,
                Chunk::new("same.bin", 1, one.len() as u64, one.as_slice()),
                &cancel
            ),
        );
        a.unwrap();
        b.unwrap();

        for (id, expected) in [(0u64, &zero), (1, &one)] {
            let mut chunk = transport
                .recv_chunk(&node, "same.bin", id, &cancel)
                .await
                .unwrap();
            let mut body = Vec::new();
            chunk.body.read_to_end(&mut body).await.unwrap();
            assert_eq!(&body, expected, "chunk {id}");
        }
    }

    #[tokio::test]
    async fn frames_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sender = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let big = vec![9u8; 70_000];
            for (id, body) in [(0u64, &b""[..]), (1, &b"abc"[..]), (7, &big[..])] {
                write_chunk_frame(&mut stream, Chunk::new("rt.bin", id, body.len() as u64, body))
                    .await
                    .unwrap();
            }
            stream.shutdown().await.unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let mut chunk = read_chunk_frame(&mut stream).await.unwrap();
            let mut body = Vec::new();
            chunk.body.read_to_end(&mut body).await.unwrap();
            assert_eq!(chunk.filename, "rt.bin");
            assert_eq!(body.len() as u64, chunk.size);
            seen.push((chunk.id, chunk.size));
        }
        assert_eq!(seen, vec![(0, 0), (1, 3), (7, 70_000)]);
        sender.await.unwrap();
    }

    #[test]
    fn windows_cover_the_source() {
        let data = Arc::new(content(2500));
        for chunk_size in [1u64, 7, 999, 1000, 2500, 4096] {
            let windows = split(Arc::clone(&data), 2500, chunk_size).unwrap();
            let lens: Vec<u64> = windows.iter().map(|w| w.len()).collect();
            assert_eq!(lens.iter().sum::<u64>(), 2500);
            assert!(lens[..lens.len() - 1].iter().all(|&l| l == chunk_size));

            let mut joined = Vec::new();
            for mut window in windows {
                std::io::Read::read_to_end(&mut window, &mut joined).unwrap();
            }
            assert_eq!(joined, *data);
        }
    }

    #[test]
    fn sink_windows_honor_boundaries() {
        let sink = Arc::new(MemorySink::new());
        let mut w = sfs_chunkio::WindowWriter::new(Arc::clone(&sink), 4, 8);

        let outcome = w.write_window(b"abcdef").unwrap();
        assert!(outcome.is_short());
        assert_eq!(outcome.written(), 4);
        assert!(matches!(
            w.write_window(b"x"),
            Err(sfs_chunkio::WindowError::EndOfWindow)
        ));
        assert_eq!(&sink.contents()[4..8], b"abcd");
    }

    #[test]
    fn placement_and_density() {
        let nodes = ["a:1", "b:2", "c:3"];
        for id in 0..50 {
            assert_eq!(place("p", id, &nodes), place("p", id, &nodes));
        }
        assert_eq!(check_density([0, 1, 2]).unwrap(), 3);
        assert!(matches!(
            check_density([0, 2]),
            Err(ClientError::IncompleteFile { .. })
        ));
        assert!(matches!(check_density([]), Err(ClientError::NotFound)));
    }

    #[tokio::test]
    async fn unknown_tag_gets_invalid_request() {
        let cluster = Cluster::start(1).await;
        let mut stream = TcpStream::connect(&cluster.nodes[0]).await.unwrap();
        stream.write_all(b"#").await.unwrap();

        assert_eq!(
            read_status(&mut stream).await.unwrap(),
            StatusCode::InvalidRequest
        );
        assert!(read_message(&mut stream).await.unwrap().contains("dec:35"));

        // The node keeps serving.
        let mut stream = TcpStream::connect(&cluster.nodes[0]).await.unwrap();
        write_op(&mut stream, Op::ListIds).await.unwrap();
        sfs_protocol::write_list_ids_request(
            &mut stream,
            &sfs_protocol::ListIdsRequest {
                filename: "x".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(read_status(&mut stream).await.unwrap(), StatusCode::Ok);
    }
}
