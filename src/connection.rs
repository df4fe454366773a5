//! Connection Manager: owns the set of accepted downstream TCP clients,
//! enforces the connection cap, and delivers byte buffers to one or all of
//! them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::events::{ConnectionInfo, EventBus, GatewayEvent};
use crate::utils::configure_client_socket;

/// Default cap on concurrently accepted downstream clients.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

struct Connection {
    id: String,
    remote_address: String,
    remote_port: u16,
    connected_at: DateTime<Utc>,
    bytes_written: AtomicU64,
    write_half: AsyncMutex<OwnedWriteHalf>,
}

/// Manages accepted downstream TCP clients.
pub struct ConnectionManager {
    max_connections: usize,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    event_bus: Arc<EventBus>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, event_bus: Arc<EventBus>) -> Self {
        Self {
            max_connections,
            connections: RwLock::new(HashMap::new()),
            event_bus,
            next_id: AtomicU64::new(1),
        }
    }

    /// Accept one freshly-connected socket. Returns the assigned connection
    /// id, or `None` if the connection cap was reached (the socket is closed
    /// immediately and no event is published).
    ///
    /// Takes `self` behind an `Arc` so the spawned disconnect-detection task
    /// can hold its own strong reference rather than borrowing.
    pub fn accept(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Option<String> {
        if self.active_count() >= self.max_connections {
            tracing::debug!(%addr, "rejecting connection: max_connections reached");
            drop(stream);
            return None;
        }

        if let Err(err) = configure_client_socket(&stream) {
            tracing::warn!(%addr, error = %err, "failed to configure client socket options");
        }

        let id = format!("conn_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (read_half, write_half) = stream.into_split();
        let connected_at = Utc::now();

        let connection = Arc::new(Connection {
            id: id.clone(),
            remote_address: addr.ip().to_string(),
            remote_port: addr.port(),
            connected_at,
            bytes_written: AtomicU64::new(0),
            write_half: AsyncMutex::new(write_half),
        });

        self.connections.write().insert(id.clone(), connection);

        self.event_bus.publish(GatewayEvent::ClientConnected {
            id: id.clone(),
            info: ConnectionInfo {
                remote_address: addr.ip().to_string(),
                remote_port: addr.port(),
                connected_at,
            },
        });

        // The read half exists only to detect peer close/reset; downstream
        // players never send data the gateway acts on.
        let manager_id = id.clone();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut read_half = read_half;
            let mut sink = [0u8; 64];
            loop {
                match read_half.read(&mut sink).await {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            manager.disconnect(&manager_id);
        });

        Some(id)
    }

    /// Write `buf` to one connection. Disconnects and returns `false` on any
    /// failure, including a connection that no longer exists.
    pub async fn send(&self, id: &str, buf: &Bytes) -> bool {
        let Some(connection) = self.connections.read().get(id).cloned() else {
            return false;
        };

        let mut write_half = connection.write_half.lock().await;
        match write_half.write_all(buf).await {
            Ok(()) => {
                connection
                    .bytes_written
                    .fetch_add(buf.len() as u64, Ordering::Relaxed);
                true
            }
            Err(err) => {
                tracing::debug!(id, error = %err, "client write failed");
                drop(write_half);
                self.disconnect(id);
                false
            }
        }
    }

    /// Write `buf` to every active connection. Returns `true` iff at least
    /// one write succeeded. A failing client is disconnected without
    /// affecting delivery to the others.
    pub async fn broadcast(&self, buf: &Bytes) -> bool {
        let ids: Vec<String> = self.connections.read().keys().cloned().collect();
        let mut delivered = false;
        for id in ids {
            if self.send(&id, buf).await {
                delivered = true;
            }
        }
        delivered
    }

    /// Remove a connection's bookkeeping and publish `client_disconnected`.
    /// Idempotent: a second call for an id that is no longer present is a no-op.
    pub fn disconnect(&self, id: &str) {
        if self.connections.write().remove(id).is_some() {
            self.event_bus.publish(GatewayEvent::ClientDisconnected { id: id.to_string() });
        }
    }

    pub fn active_count(&self) -> usize {
        self.connections.read().len()
    }

    /// A point-in-time, independent snapshot of every active connection.
    pub fn stats(&self) -> HashMap<String, ConnectionInfo> {
        self.connections
            .read()
            .values()
            .map(|c| {
                (
                    c.id.clone(),
                    ConnectionInfo {
                        remote_address: c.remote_address.clone(),
                        remote_port: c.remote_port,
                        connected_at: c.connected_at,
                    },
                )
            })
            .collect()
    }

    /// Disconnect every connection and release all handlers.
    pub fn close(&self) {
        let ids: Vec<String> = self.connections.read().keys().cloned().collect();
        for id in ids {
            self.disconnect(&id);
        }
    }
}
