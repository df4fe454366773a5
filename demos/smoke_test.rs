//! Manual smoke test: wires a synthetic upstream camera to a real
//! `StreamServer` so the TCP fan-out can be exercised with a real player,
//! e.g.:
//!
//! ```text
//! cargo run --bin smoke-test
//! ffplay tcp://127.0.0.1:8080
//! ```
//!
//! The synthetic upstream never talks to a real camera; it emits a
//! SPS/PPS/IDR/P-slice cadence on a timer once `start_livestream` is called,
//! closely enough to a real GOP structure to let a player lock on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eufy_stream_gateway::upstream::{FrameEvent, Unsubscribe, UpstreamClient, UpstreamVideoSubscription};
use eufy_stream_gateway::{GatewayError, ServerConfig, StreamServer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct SyntheticCamera {
    frame_tx: parking_lot::Mutex<Option<mpsc::Sender<FrameEvent>>>,
    generator: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticCamera {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frame_tx: parking_lot::Mutex::new(None),
            generator: parking_lot::Mutex::new(None),
        })
    }
}

#[async_trait]
impl UpstreamClient for SyntheticCamera {
    async fn start_livestream(&self, serial: &str) -> Result<(), GatewayError> {
        let Some(tx) = self.frame_tx.lock().clone() else {
            return Ok(());
        };
        let serial = serial.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(66));
            let sps = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f]);
            let pps = Bytes::from_static(&[0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]);
            let idr = Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00]);
            let p_slice = Bytes::from_static(&[0, 0, 0, 1, 0x61, 0x00, 0x00, 0x00]);

            let mut frame_index: u32 = 0;
            loop {
                ticker.tick().await;
                let buffer = match frame_index % 30 {
                    0 => {
                        let mut gop_start = sps.to_vec();
                        gop_start.extend_from_slice(&pps);
                        gop_start.extend_from_slice(&idr);
                        Bytes::from(gop_start)
                    }
                    _ => p_slice.clone(),
                };
                let event = FrameEvent {
                    serial: serial.clone(),
                    buffer,
                    metadata: None,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
                frame_index = frame_index.wrapping_add(1);
            }
        });
        *self.generator.lock() = Some(handle);
        Ok(())
    }

    async fn stop_livestream(&self, _serial: &str) -> Result<(), GatewayError> {
        if let Some(handle) = self.generator.lock().take() {
            handle.abort();
        }
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let camera = SyntheticCamera::new();
    let config = ServerConfig::new(camera, "demo-camera").with_port(8080);
    let server = StreamServer::new(config);

    server.start().await?;
    tracing::info!(port = server.listening_port().unwrap_or_default(), "smoke-test gateway listening");

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    Ok(())
}
