//! Gateway event types
//!
//! Defines every event the stream gateway can broadcast through its event bus.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a downstream TCP connection, published on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub remote_address: String,
    pub remote_port: u16,
    pub connected_at: DateTime<Utc>,
}

/// Captured video stream properties, set once from the first upstream frame
/// that carries a metadata side-channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub codec: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// One broadcast frame, carried by `video_streamed`. `buffer` is the same
/// `Bytes` handed to the Connection Manager for that broadcast — cloning it
/// is a refcount bump, not a copy, so publishing it on every frame stays cheap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInfo {
    pub buffer: Bytes,
    pub len: usize,
    pub is_keyframe: bool,
    pub timestamp: DateTime<Utc>,
}

/// Gateway event enumeration.
///
/// All events are tagged with their event name for serialization, producing
/// a JSON structure like:
/// ```json
/// {"event": "client_connected", "data": {"id": "conn_3", "info": {...}}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum GatewayEvent {
    /// The server started accepting connections and requested the upstream subscription.
    #[serde(rename = "started")]
    Started { port: u16 },

    /// The server stopped; all connections were closed and the upstream subscription released.
    #[serde(rename = "stopped")]
    Stopped,

    /// A downstream TCP client was accepted and registered.
    #[serde(rename = "client_connected")]
    ClientConnected { id: String, info: ConnectionInfo },

    /// A downstream TCP client was removed (closed, reset, or evicted).
    #[serde(rename = "client_disconnected")]
    ClientDisconnected { id: String },

    /// A validated frame was broadcast to all active clients.
    #[serde(rename = "video_streamed")]
    VideoStreamed { frame: FrameInfo },

    /// Video metadata was captured for the first time.
    #[serde(rename = "metadata_received")]
    MetadataReceived { metadata: VideoMetadata },

    /// A `start_livestream`/`stop_livestream` command failed after exhausting retries.
    #[serde(rename = "stream_error")]
    StreamError { message: String },

    /// A non-fatal runtime error worth surfacing to an operator (e.g. listener accept failure).
    #[serde(rename = "error")]
    Error { message: String },
}

impl GatewayEvent {
    /// The dotted topic name used for `matches_topic` filtering and for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            GatewayEvent::Started { .. } => "started",
            GatewayEvent::Stopped => "stopped",
            GatewayEvent::ClientConnected { .. } => "client_connected",
            GatewayEvent::ClientDisconnected { .. } => "client_disconnected",
            GatewayEvent::VideoStreamed { .. } => "video_streamed",
            GatewayEvent::MetadataReceived { .. } => "metadata_received",
            GatewayEvent::StreamError { .. } => "stream_error",
            GatewayEvent::Error { .. } => "error",
        }
    }

    /// Matches a topic filter. `"*"` matches everything; `"client_*"` matches
    /// every event name starting with `client_`; anything else is an exact match.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }
        let event_name = self.event_name();
        if let Some(prefix) = topic.strip_suffix('*') {
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
