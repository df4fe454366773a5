//! Lifecycle Controller — the heart of the gateway.
//!
//! Converts "downstream demand changed" and "upstream frame arrived" signals
//! into a correct sequence of `start_livestream` / `stop_livestream` calls,
//! serializing every reconciliation cycle through a single in-flight flag so
//! commands are never issued concurrently for the same camera.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{is_benign_stop_error, GatewayError, Result};
use crate::events::{EventBus, GatewayEvent};
use crate::upstream::UpstreamClient;

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

type SnapshotResult = std::result::Result<Bytes, GatewayError>;

struct PendingSnapshot {
    id: u64,
    tx: oneshot::Sender<SnapshotResult>,
}

struct ControllerState {
    intended: bool,
    actual: bool,
    in_flight: bool,
    pending_reconcile: bool,
    has_clients: bool,
    last_activity_at: Instant,
    resolvers: VecDeque<PendingSnapshot>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            intended: false,
            actual: false,
            in_flight: false,
            pending_reconcile: false,
            has_clients: false,
            last_activity_at: Instant::now(),
            resolvers: VecDeque::new(),
        }
    }
}

/// Tunables governing retry, grace, and idle behavior. Mirrors the relevant
/// fields of [`crate::config::ServerConfig`].
pub struct LifecycleConfig {
    pub start_retry_count: u32,
    pub start_retry_delay: Duration,
    pub post_start_grace: Duration,
    pub idle_timeout: Duration,
}

/// Coordinates upstream livestream state with downstream demand.
pub struct LifecycleController {
    camera_id: String,
    upstream: Arc<dyn UpstreamClient>,
    event_bus: Arc<EventBus>,
    config: LifecycleConfig,
    state: parking_lot::Mutex<ControllerState>,
    next_resolver_id: AtomicU64,
}

impl LifecycleController {
    /// Construct the controller and start its background idle-shutdown checker.
    pub fn new(
        camera_id: String,
        upstream: Arc<dyn UpstreamClient>,
        event_bus: Arc<EventBus>,
        config: LifecycleConfig,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            camera_id,
            upstream,
            event_bus,
            config,
            state: parking_lot::Mutex::new(ControllerState::new()),
            next_resolver_id: AtomicU64::new(1),
        });
        Self::spawn_idle_checker(Arc::clone(&this));
        this
    }

    /// Whether the controller currently believes a livestream is active.
    pub fn is_active(&self) -> bool {
        self.state.lock().actual
    }

    /// Called by the façade whenever the number of active TCP connections
    /// changes. Transitions `intended` and triggers a reconcile if needed.
    pub fn notify_client_count(self: &Arc<Self>, active_count: usize) {
        let changed = {
            let mut st = self.state.lock();
            st.has_clients = active_count > 0;
            if active_count > 0 {
                st.last_activity_at = Instant::now();
            }
            let desired = st.has_clients || !st.resolvers.is_empty();
            if desired != st.intended {
                st.intended = desired;
                true
            } else {
                false
            }
        };
        if changed {
            self.trigger_reconcile();
        }
    }

    /// Called by the façade for every frame observed, after it has been
    /// validated and classified. Marks the stream active on first arrival
    /// and resolves any pending snapshot resolvers on a keyframe.
    pub fn on_frame_received(self: &Arc<Self>, frame: &Bytes, is_keyframe: bool) {
        let resolved: Vec<PendingSnapshot> = {
            let mut st = self.state.lock();
            st.actual = true;
            st.last_activity_at = Instant::now();
            if is_keyframe && !st.resolvers.is_empty() {
                st.resolvers.drain(..).collect()
            } else {
                Vec::new()
            }
        };

        if !resolved.is_empty() {
            for pending in resolved {
                let _ = pending.tx.send(Ok(frame.clone()));
            }
            self.relax_intended_if_idle();
        }
    }

    /// Request a single keyframe, starting the stream if necessary. Resolves
    /// with the next keyframe observed after this call, or rejects with
    /// [`GatewayError::SnapshotTimeout`] if none arrives within `timeout`.
    pub async fn capture_snapshot(self: &Arc<Self>, timeout: Duration) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_resolver_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut st = self.state.lock();
            st.resolvers.push_back(PendingSnapshot { id, tx });
            st.intended = true;
        }
        self.trigger_reconcile();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                self.relax_intended_if_idle();
                result
            }
            Ok(Err(_)) => {
                self.relax_intended_if_idle();
                Err(GatewayError::Cancelled)
            }
            Err(_elapsed) => {
                self.state.lock().resolvers.retain(|p| p.id != id);
                self.relax_intended_if_idle();
                Err(GatewayError::SnapshotTimeout(timeout))
            }
        }
    }

    /// Force the stream stopped, reject every pending snapshot resolver, and
    /// wait (best-effort, bounded) for the final reconcile cycle to settle.
    pub async fn shutdown(self: &Arc<Self>) {
        let resolvers: Vec<PendingSnapshot> = {
            let mut st = self.state.lock();
            st.intended = false;
            st.has_clients = false;
            st.resolvers.drain(..).collect()
        };
        for pending in resolvers {
            let _ = pending.tx.send(Err(GatewayError::Cancelled));
        }
        self.trigger_reconcile();

        for _ in 0..100 {
            if !self.state.lock().in_flight {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn relax_intended_if_idle(self: &Arc<Self>) {
        let changed = {
            let mut st = self.state.lock();
            if st.intended && !st.has_clients && st.resolvers.is_empty() {
                st.intended = false;
                true
            } else {
                false
            }
        };
        if changed {
            self.trigger_reconcile();
        }
    }

    /// Schedule a reconcile cycle. If one is already running, mark that it
    /// should run again once the current cycle settles rather than running
    /// a second cycle concurrently.
    fn trigger_reconcile(self: &Arc<Self>) {
        let should_spawn = {
            let mut st = self.state.lock();
            if st.in_flight {
                st.pending_reconcile = true;
                false
            } else {
                st.in_flight = true;
                true
            }
        };
        if should_spawn {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.reconcile_loop().await });
        }
    }

    async fn reconcile_loop(self: Arc<Self>) {
        loop {
            let (intended, actual) = {
                let st = self.state.lock();
                (st.intended, st.actual)
            };

            if intended && !actual {
                self.do_start().await;
            } else if !intended && actual {
                self.do_stop().await;
            }

            let mut st = self.state.lock();
            if st.pending_reconcile {
                st.pending_reconcile = false;
                continue;
            }
            st.in_flight = false;
            break;
        }
    }

    async fn do_start(self: &Arc<Self>) {
        let attempts = self.config.start_retry_count.max(1);
        for attempt in 1..=attempts {
            match self.upstream.start_livestream(&self.camera_id).await {
                Ok(()) => {
                    self.spawn_post_start_grace();
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        attempt,
                        error = %err,
                        "start_livestream failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.start_retry_delay).await;
                    }
                }
            }
        }
        self.event_bus.publish(GatewayEvent::StreamError {
            message: format!("start_livestream failed after {attempts} attempts"),
        });
    }

    async fn do_stop(self: &Arc<Self>) {
        let attempts = self.config.start_retry_count.max(1);
        for attempt in 1..=attempts {
            match self.upstream.stop_livestream(&self.camera_id).await {
                Ok(()) => {
                    self.state.lock().actual = false;
                    return;
                }
                Err(err) => {
                    let message = err.to_string();
                    if is_benign_stop_error(&message) {
                        tracing::debug!(camera_id = %self.camera_id, "stop_livestream: already stopped");
                        self.state.lock().actual = false;
                        return;
                    }
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        attempt,
                        error = %message,
                        "stop_livestream failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.start_retry_delay).await;
                    }
                }
            }
        }
        self.event_bus.publish(GatewayEvent::StreamError {
            message: format!("stop_livestream failed after {attempts} attempts"),
        });
    }

    fn spawn_post_start_grace(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let grace = self.config.post_start_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            let still_pending = {
                let st = this.state.lock();
                st.intended && !st.actual
            };
            if still_pending {
                this.trigger_reconcile();
            }
        });
    }

    fn spawn_idle_checker(this: Arc<Self>) {
        let weak = Arc::downgrade(&this);
        let idle_timeout = this.config.idle_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                let should_stop = {
                    let st = this.state.lock();
                    !st.has_clients && st.intended && st.last_activity_at.elapsed() >= idle_timeout
                };
                if should_stop {
                    this.state.lock().intended = false;
                    this.trigger_reconcile();
                }
            }
        });
    }
}
