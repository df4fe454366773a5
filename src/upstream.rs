//! The external WebSocket-driver collaborator interface.
//!
//! This crate never implements a WebSocket client itself — that driver
//! (device discovery, authentication, reconnection) is out of scope and
//! lives in a separate crate. What is specified here is the *shape* that
//! driver must present: two commands and one filtered event subscription.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Video metadata as delivered by the upstream driver, before validation.
/// Distinct from [`crate::events::VideoMetadata`], which is the validated,
/// internally-held record.
#[derive(Debug, Clone)]
pub struct VideoMetadataRaw {
    pub codec: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// One `livestream_video_data` event, already normalized to an owned byte
/// buffer — any base64-in-JSON or raw-array representation on the wire is
/// the driver's concern to decode before constructing this record.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub serial: String,
    pub buffer: Bytes,
    pub metadata: Option<VideoMetadataRaw>,
}

/// Guard returned by [`UpstreamClient::subscribe_video_data`]. Dropping it
/// stops further deliveries to the paired receiver.
pub struct Unsubscribe {
    _inner: Box<dyn std::any::Any + Send + Sync>,
}

impl Unsubscribe {
    pub fn new<T: Send + Sync + 'static>(guard: T) -> Self {
        Self {
            _inner: Box::new(guard),
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").finish()
    }
}

/// A live subscription to one camera's video-data events.
pub struct UpstreamVideoSubscription {
    pub receiver: mpsc::Receiver<FrameEvent>,
    pub unsubscribe: Unsubscribe,
}

/// The commands and event subscription this gateway needs from an upstream
/// WebSocket camera driver. Implemented by the (out-of-scope) driver crate;
/// test code substitutes a mock.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Ask the camera identified by `serial` to begin streaming.
    async fn start_livestream(&self, serial: &str) -> Result<()>;

    /// Ask the camera identified by `serial` to stop streaming. Implementors
    /// report an already-stopped stream as an error containing the substring
    /// `livestream_not_running`; the lifecycle controller treats that as success.
    async fn stop_livestream(&self, serial: &str) -> Result<()>;

    /// Subscribe to `livestream_video_data` events for `serial`.
    fn subscribe_video_data(&self, serial: &str) -> UpstreamVideoSubscription;
}
