//! Utility modules shared across the gateway.

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, configure_client_socket};
pub use throttle::LogThrottler;
