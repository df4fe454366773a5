//! Black-box integration tests: a real `StreamServer` bound to an
//! OS-assigned port, driven by an in-process mock upstream client, observed
//! through real `tokio::net::TcpStream` downstream connections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eufy_stream_gateway::upstream::{FrameEvent, Unsubscribe, UpstreamClient, UpstreamVideoSubscription};
use eufy_stream_gateway::{GatewayError, ServerConfig, StreamServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

struct MockUpstream {
    frame_tx: parking_lot::Mutex<Option<mpsc::Sender<FrameEvent>>>,
    start_calls: std::sync::atomic::AtomicU32,
    stop_calls: std::sync::atomic::AtomicU32,
}

impl MockUpstream {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frame_tx: parking_lot::Mutex::new(None),
            start_calls: std::sync::atomic::AtomicU32::new(0),
            stop_calls: std::sync::atomic::AtomicU32::new(0),
        })
    }

    async fn push(&self, buf: &[u8]) {
        let sender = self.frame_tx.lock().clone();
        if let Some(tx) = sender {
            let _ = tx
                .send(FrameEvent {
                    serial: "T1".to_string(),
                    buffer: Bytes::copy_from_slice(buf),
                    metadata: None,
                })
                .await;
        }
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn start_livestream(&self, _serial: &str) -> Result<(), GatewayError> {
        self.start_calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn stop_livestream(&self, _serial: &str) -> Result<(), GatewayError> {
        self.stop_calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    fn subscribe_video_data(&self, _serial: &str) -> UpstreamVideoSubscription {
        let (tx, rx) = mpsc::channel(32);
        *self.frame_tx.lock() = Some(tx);
        UpstreamVideoSubscription {
            receiver: rx,
            unsubscribe: Unsubscribe::new(()),
        }
    }
}

async fn read_exact_bytes(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn client_receives_exact_concatenated_frame_stream() {
    let upstream = MockUpstream::new();
    let config = ServerConfig::new(upstream.clone(), "T1").with_port(0);
    let server = StreamServer::new(config);
    server.start().await.unwrap();

    let addr = format!("127.0.0.1:{}", server.listening_port().unwrap());
    let mut client = TcpStream::connect(&addr).await.unwrap();

    // Give the accept loop a moment to register the connection before frames fly.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let f1 = [0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f]; // SPS
    let f2 = [0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]; // PPS
    let f3 = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00]; // IDR
    let f4 = [0, 0, 0, 1, 0x61, 0x00, 0x00, 0x00]; // P-slice

    for frame in [&f1[..], &f2[..], &f3[..], &f4[..]] {
        upstream.push(frame).await;
    }

    let mut expected = Vec::new();
    expected.extend_from_slice(&f1);
    expected.extend_from_slice(&f2);
    expected.extend_from_slice(&f3);
    expected.extend_from_slice(&f4);

    let received = read_exact_bytes(&mut client, expected.len()).await;
    assert_eq!(received, expected);

    drop(client);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(server.active_connection_count(), 0);

    server.stop().await;
    assert_eq!(
        upstream.stop_calls.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn connection_over_cap_is_closed_without_disturbing_existing_clients() {
    let upstream = MockUpstream::new();
    let config = ServerConfig::new(upstream.clone(), "T1")
        .with_port(0)
        .with_max_connections(1);
    let server = StreamServer::new(config);
    server.start().await.unwrap();

    let addr = format!("127.0.0.1:{}", server.listening_port().unwrap());
    let first = TcpStream::connect(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(server.active_connection_count(), 1);

    let mut second = TcpStream::connect(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The extra socket is accepted by the OS but closed immediately by the
    // gateway; reading from it should observe EOF rather than any frame bytes.
    let mut probe = [0u8; 1];
    let read_result = second.read(&mut probe).await;
    assert!(matches!(read_result, Ok(0)));
    assert_eq!(server.active_connection_count(), 1);

    drop(first);
    server.stop().await;
}

#[tokio::test]
async fn snapshot_without_clients_starts_stream_and_stops_after() {
    let upstream = MockUpstream::new();
    let config = ServerConfig::new(upstream.clone(), "T1").with_port(0);
    let server = StreamServer::new(config);
    server.start().await.unwrap();

    let server_clone = Arc::clone(&server);
    let snapshot = tokio::spawn(async move {
        server_clone.capture_snapshot(Some(Duration::from_secs(2))).await
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        upstream.start_calls.load(std::sync::atomic::Ordering::Relaxed),
        1
    );

    let idr = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
    upstream.push(&idr).await;

    let frame = snapshot.await.unwrap().unwrap();
    assert_eq!(&frame[..], &idr[..]);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        upstream.stop_calls.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert!(server.stats().last_frame_time.is_some());

    server.stop().await;
}
