//! Stream server configuration.
//!
//! A plain builder-style struct, not a file- or environment-backed store —
//! turning on-disk or env configuration into a [`ServerConfig`] is the
//! responsibility of a host application (the CLI front-end), out of scope here.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::upstream::UpstreamClient;

/// Configuration for a [`crate::server::StreamServer`].
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_host: IpAddr,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub start_retry_count: u32,
    pub start_retry_delay: Duration,
    pub post_start_grace: Duration,
    pub upstream_client: Arc<dyn UpstreamClient>,
    pub camera_id: String,
}

impl ServerConfig {
    /// Create a config with the required fields and every other value at
    /// its default.
    pub fn new(upstream_client: Arc<dyn UpstreamClient>, camera_id: impl Into<String>) -> Self {
        Self {
            port: 8080,
            bind_host: IpAddr::from([0, 0, 0, 0]),
            max_connections: 10,
            idle_timeout: Duration::from_secs(30),
            start_retry_count: 3,
            start_retry_delay: Duration::from_secs(5),
            post_start_grace: Duration::from_secs(30),
            upstream_client,
            camera_id: camera_id.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_host(mut self, host: IpAddr) -> Self {
        self.bind_host = host;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_start_retry(mut self, count: u32, delay: Duration) -> Self {
        self.start_retry_count = count;
        self.start_retry_delay = delay;
        self
    }

    pub fn with_post_start_grace(mut self, grace: Duration) -> Self {
        self.post_start_grace = grace;
        self
    }

    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind_host, self.port)
    }
}
