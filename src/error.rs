use thiserror::Error;

/// Gateway-wide error type.
///
/// Most variants are contained at the point they occur (a per-frame or
/// per-connection failure is logged and the gateway keeps running); only
/// the ones documented on the methods that return them escape to a caller.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("frame failed structural validation")]
    InvalidFrame,

    #[error("write to connection {id} failed: {source}")]
    ClientWriteError {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream {command} command failed after retries: {reason}")]
    UpstreamCommandFailed { command: &'static str, reason: String },

    #[error("no keyframe observed within {0:?}")]
    SnapshotTimeout(std::time::Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("failed to bind listener on {addr}: {source}")]
    ListenerError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("timed out waiting for video metadata")]
    MetadataTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Vendor-quirk substring the upstream driver uses to report that a
/// `stop_livestream` call targeted a stream that was already stopped.
/// This classification never reaches callers as a `GatewayError` — it is
/// treated as success by the lifecycle controller's `reconcile` loop.
pub(crate) const BENIGN_STOP_MARKER: &str = "livestream_not_running";

pub(crate) fn is_benign_stop_error(message: &str) -> bool {
    message.contains(BENIGN_STOP_MARKER)
}
