//! Eufy stream gateway
//!
//! Bridges an upstream WebSocket-based Eufy camera driver to downstream raw
//! TCP media-player clients (ffplay, VLC, MPV), managing the camera's
//! livestream lifecycle according to downstream demand.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod parser;
pub mod server;
pub mod upstream;
pub mod utils;

pub use config::ServerConfig;
pub use error::{GatewayError, Result};
pub use server::{ServerStats, StreamServer};
pub use upstream::{FrameEvent, UpstreamClient, UpstreamVideoSubscription, VideoMetadataRaw};
