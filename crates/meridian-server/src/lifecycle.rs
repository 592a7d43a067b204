//! Graceful shutdown coordination and health/readiness probes, ported
//! near-verbatim from `fraiseql-runtime::lifecycle::shutdown`'s
//! `ShutdownCoordinator`/`RequestGuard` pattern — pure ambient concern,
//! unchanged by this crate's domain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::timeout;

use crate::state::AppState;

/// Coordinates graceful shutdown across the HTTP listener and any
/// background tasks (outbox relay, idempotency sweep).
pub struct ShutdownCoordinator {
    shutdown_initiated: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    in_flight: AtomicU64,
    drain_complete: Notify,
    drain_timeout: Duration,
    delay: Duration,
}

impl ShutdownCoordinator {
    /// Build a coordinator that waits `delay` for load-balancer
    /// deregistration before signaling shutdown, then `drain_timeout`
    /// for in-flight requests to finish.
    #[must_use]
    pub fn new(drain_timeout: Duration, delay: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (ready_tx, ready_rx) = watch::channel(true);

        Arc::new(Self {
            shutdown_initiated: AtomicBool::new(false),
            shutdown_tx,
            ready_tx,
            ready_rx,
            in_flight: AtomicU64::new(0),
            drain_complete: Notify::new(),
            drain_timeout,
            delay,
        })
    }

    /// Subscribe to the shutdown broadcast.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// `true` once shutdown has been initiated and the server has
    /// stopped advertising readiness.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Track a new in-flight request. Returns `None` if shutdown has
    /// already started, so callers can reject the request with 503.
    pub fn request_started(&self) -> Option<RequestGuard<'_>> {
        if self.is_shutting_down() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard { coordinator: self })
    }

    fn request_completed(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutting_down() {
            self.drain_complete.notify_waiters();
        }
    }

    /// Run the full shutdown sequence: stop advertising ready, wait for
    /// the load balancer to notice, signal subscribers, then drain.
    pub async fn shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("shutdown initiated");
        let _ = self.ready_tx.send(false);
        tokio::time::sleep(self.delay).await;

        let _ = self.shutdown_tx.send(());

        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight > 0 {
            tracing::info!(in_flight, "draining in-flight requests");
            if timeout(self.drain_timeout, self.wait_for_drain()).await.is_err() {
                let remaining = self.in_flight.load(Ordering::SeqCst);
                tracing::warn!(remaining, "shutdown timeout reached with requests still in-flight");
            }
        }

        tracing::info!("shutdown complete");
    }

    async fn wait_for_drain(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.drain_complete.notified().await;
        }
    }
}

/// RAII guard tracking one in-flight request.
pub struct RequestGuard<'a> {
    coordinator: &'a ShutdownCoordinator,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.request_completed();
    }
}

/// Resolve when either `ctrl_c` or `SIGTERM` is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

/// `GET /health/live` — process liveness only, never depends on
/// downstream state.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// `GET /health/ready` — `false` once shutdown has begun, so the load
/// balancer stops routing new traffic.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.shutdown.is_ready() {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_marks_not_ready_and_notifies_subscribers() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50), Duration::from_millis(0));
        let mut rx = coordinator.subscribe();
        assert!(coordinator.is_ready());

        coordinator.shutdown().await;

        assert!(!coordinator.is_ready());
        assert!(coordinator.is_shutting_down());
        rx.try_recv().expect("shutdown signal should have been sent");
    }

    #[tokio::test]
    async fn request_guard_decrements_on_drop() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50), Duration::from_millis(0));
        {
            let _guard = coordinator.request_started().unwrap();
            assert_eq!(coordinator.in_flight.load(Ordering::SeqCst), 1);
        }
        assert_eq!(coordinator.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_new_requests_are_admitted_after_shutdown_starts() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50), Duration::from_millis(0));
        coordinator.shutdown().await;
        assert!(coordinator.request_started().is_none());
    }
}
