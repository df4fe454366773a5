//! Stream Server façade: binds the downstream TCP listener, wires the
//! upstream subscription to the Lifecycle Controller and Connection
//! Manager, and exposes the gateway's public operations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::error::{GatewayError, Result};
use crate::events::{EventBus, GatewayEvent, VideoMetadata};
use crate::lifecycle::{LifecycleConfig, LifecycleController};
use crate::parser;
use crate::upstream::{FrameEvent, Unsubscribe};
use crate::utils::{bind_tcp_listener, LogThrottler};

const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Point-in-time projection of server activity, safe to serialize and hand
/// to a host application's own reporting transport.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub is_active: bool,
    pub port: Option<u16>,
    pub uptime_secs: Option<u64>,
    pub active_connections: usize,
    pub total_connections: u64,
    pub frames_processed: u64,
    pub bytes_transferred: u64,
    pub last_frame_time: Option<DateTime<Utc>>,
}

struct RunningHandles {
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    demand_task: JoinHandle<()>,
    frame_task: JoinHandle<()>,
    _video_subscription: Unsubscribe,
}

/// Bridges one upstream camera's WebSocket livestream to downstream TCP clients.
pub struct StreamServer {
    config: ServerConfig,
    connections: Arc<ConnectionManager>,
    lifecycle: Arc<LifecycleController>,
    event_bus: Arc<EventBus>,

    metadata_tx: watch::Sender<Option<VideoMetadata>>,
    metadata_rx: watch::Receiver<Option<VideoMetadata>>,

    listening_port: RwLock<Option<u16>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    total_connections: AtomicU64,
    frames_processed: AtomicU64,
    bytes_transferred: AtomicU64,
    last_frame_time: RwLock<Option<DateTime<Utc>>>,
    is_running: AtomicBool,
    invalid_frame_throttle: LogThrottler,

    running: AsyncMutex<Option<RunningHandles>>,
}

impl StreamServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let event_bus = Arc::new(EventBus::new());
        let connections = Arc::new(ConnectionManager::new(config.max_connections, Arc::clone(&event_bus)));
        let lifecycle = LifecycleController::new(
            config.camera_id.clone(),
            Arc::clone(&config.upstream_client),
            Arc::clone(&event_bus),
            LifecycleConfig {
                start_retry_count: config.start_retry_count,
                start_retry_delay: config.start_retry_delay,
                post_start_grace: config.post_start_grace,
                idle_timeout: config.idle_timeout,
            },
        );
        let (metadata_tx, metadata_rx) = watch::channel(None);

        Arc::new(Self {
            config,
            connections,
            lifecycle,
            event_bus,
            metadata_tx,
            metadata_rx,
            listening_port: RwLock::new(None),
            started_at: RwLock::new(None),
            total_connections: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            last_frame_time: RwLock::new(None),
            is_running: AtomicBool::new(false),
            invalid_frame_throttle: LogThrottler::default(),
            running: AsyncMutex::new(None),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn listening_port(&self) -> Option<u16> {
        *self.listening_port.read()
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections.active_count()
    }

    pub fn video_metadata(&self) -> Option<VideoMetadata> {
        self.metadata_rx.borrow().clone()
    }

    /// Bind the downstream listener and subscribe to upstream video events.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }

        let addr = self.config.bind_addr();
        let listener = bind_tcp_listener(addr).map_err(|source| GatewayError::ListenerError {
            addr: addr.to_string(),
            source,
        })?;
        let bound_port = listener.local_addr().map_err(|source| GatewayError::ListenerError {
            addr: addr.to_string(),
            source,
        })?.port();

        let subscription = self.config.upstream_client.subscribe_video_data(&self.config.camera_id);
        let mut frame_rx = subscription.receiver;

        let (shutdown_tx, mut accept_shutdown_rx) = broadcast::channel(1);
        let mut demand_shutdown_rx = shutdown_tx.subscribe();

        *self.listening_port.write() = Some(bound_port);
        *self.started_at.write() = Some(Utc::now());
        self.is_running.store(true, Ordering::Release);

        let accept_connections = Arc::clone(&self.connections);
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                accept_connections.accept(stream, peer);
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "accept failed");
                            }
                        }
                    }
                }
            }
        });

        let demand_connections = Arc::clone(&self.connections);
        let demand_lifecycle = Arc::clone(&self.lifecycle);
        let demand_server = Arc::clone(self);
        let mut demand_events = self.event_bus.subscribe();
        let demand_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = demand_shutdown_rx.recv() => break,
                    event = demand_events.recv() => {
                        match event {
                            Ok(GatewayEvent::ClientConnected { .. }) => {
                                demand_server.total_connections.fetch_add(1, Ordering::Relaxed);
                                demand_lifecycle.notify_client_count(demand_connections.active_count());
                            }
                            Ok(GatewayEvent::ClientDisconnected { .. }) => {
                                demand_lifecycle.notify_client_count(demand_connections.active_count());
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        let frame_server = Arc::clone(self);
        let frame_task = tokio::spawn(async move {
            while let Some(event) = frame_rx.recv().await {
                frame_server.handle_frame_event(event).await;
            }
        });

        *running = Some(RunningHandles {
            shutdown_tx,
            accept_task,
            demand_task,
            frame_task,
            _video_subscription: subscription.unsubscribe,
        });
        drop(running);

        self.event_bus.publish(GatewayEvent::Started { port: bound_port });
        tracing::info!(port = bound_port, camera_id = %self.config.camera_id, "stream server started");
        Ok(())
    }

    /// Stop the server. Idempotent: a second call is a no-op.
    pub async fn stop(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        let Some(handles) = running.take() else {
            return;
        };
        drop(running);

        let _ = handles.shutdown_tx.send(());
        self.lifecycle.shutdown().await;
        self.connections.close();

        handles.accept_task.abort();
        handles.demand_task.abort();
        handles.frame_task.abort();
        drop(handles._video_subscription);

        self.is_running.store(false, Ordering::Release);
        *self.listening_port.write() = None;
        *self.started_at.write() = None;

        self.event_bus.publish(GatewayEvent::Stopped);
        tracing::info!(camera_id = %self.config.camera_id, "stream server stopped");
    }

    async fn handle_frame_event(self: &Arc<Self>, event: FrameEvent) {
        if let Some(raw) = event.metadata {
            self.maybe_capture_metadata(raw);
        }
        self.push_frame(event.buffer, Some(Utc::now()), None).await;
    }

    fn maybe_capture_metadata(self: &Arc<Self>, raw: crate::upstream::VideoMetadataRaw) {
        if self.metadata_rx.borrow().is_some() {
            return;
        }
        let metadata = VideoMetadata {
            codec: raw.codec,
            fps: raw.fps,
            width: raw.width,
            height: raw.height,
        };
        let _ = self.metadata_tx.send(Some(metadata.clone()));
        self.event_bus.publish(GatewayEvent::MetadataReceived { metadata });
    }

    /// Validate, classify, broadcast, and account for one upstream frame.
    /// Returns `false` only when the buffer fails structural validation.
    pub async fn push_frame(
        self: &Arc<Self>,
        buf: Bytes,
        timestamp: Option<DateTime<Utc>>,
        is_keyframe: Option<bool>,
    ) -> bool {
        if !parser::validate(&buf) {
            crate::warn_throttled!(
                self.invalid_frame_throttle,
                "invalid_frame",
                len = buf.len(),
                "dropping invalid frame"
            );
            return false;
        }

        let is_keyframe = is_keyframe.unwrap_or_else(|| parser::is_keyframe(&buf));
        self.lifecycle.on_frame_received(&buf, is_keyframe);

        let delivered = self.connections.broadcast(&buf).await;
        if delivered {
            self.frames_processed.fetch_add(1, Ordering::Relaxed);
            self.bytes_transferred.fetch_add(buf.len() as u64, Ordering::Relaxed);
            let ts = timestamp.unwrap_or_else(Utc::now);
            *self.last_frame_time.write() = Some(ts);
        }

        self.event_bus.publish(GatewayEvent::VideoStreamed {
            frame: crate::events::FrameInfo {
                buffer: buf.clone(),
                len: buf.len(),
                is_keyframe,
                timestamp: timestamp.unwrap_or_else(Utc::now),
            },
        });

        true
    }

    /// Request a single keyframe, starting the upstream livestream if necessary.
    pub async fn capture_snapshot(self: &Arc<Self>, timeout: Option<Duration>) -> Result<Bytes> {
        self.lifecycle
            .capture_snapshot(timeout.unwrap_or(DEFAULT_SNAPSHOT_TIMEOUT))
            .await
    }

    /// Wait for video metadata to be captured, or time out.
    pub async fn await_metadata(&self, timeout: Option<Duration>) -> Result<VideoMetadata> {
        if let Some(metadata) = self.metadata_rx.borrow().clone() {
            return Ok(metadata);
        }

        let mut rx = self.metadata_rx.clone();
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return Err(GatewayError::MetadataTimeout);
                }
                if let Some(metadata) = rx.borrow().clone() {
                    return Ok(metadata);
                }
            }
        };

        match tokio::time::timeout(timeout.unwrap_or(DEFAULT_METADATA_TIMEOUT), wait).await {
            Ok(result) => result,
            Err(_elapsed) => Err(GatewayError::MetadataTimeout),
        }
    }

    pub fn stats(&self) -> ServerStats {
        let uptime_secs = self.started_at.read().map(|start| {
            (Utc::now() - start).num_seconds().max(0) as u64
        });
        ServerStats {
            is_active: self.is_running(),
            port: self.listening_port(),
            uptime_secs,
            active_connections: self.connections.active_count(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            last_frame_time: *self.last_frame_time.read(),
        }
    }

    /// Reset traffic counters. Uptime and port are unaffected.
    pub fn reset_stats(&self) {
        self.frames_processed.store(0, Ordering::Relaxed);
        self.bytes_transferred.store(0, Ordering::Relaxed);
        self.total_connections.store(0, Ordering::Relaxed);
        *self.last_frame_time.write() = None;
    }
}
