//! Health endpoints for the Presence Controller.
//!
//! Provides Kubernetes-compatible health endpoints:
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we serve traffic?)
//!
//! Note: The `/metrics` endpoint is served separately via `metrics-exporter-prometheus`.
//!
//! # Readiness
//!
//! Readiness requires two things:
//! - The `HealthState` flag, set once the listener is bound and cleared
//!   when shutdown begins so load balancers stop routing here
//! - A live answer from the coordinator actor's stats op, so a wedged or
//!   exited actor system takes the pod out of rotation

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::actors::PresenceCoordinatorActorHandle;

/// How long the readiness probe waits for the coordinator to answer.
const READINESS_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Health state for the Presence Controller.
///
/// Tracks liveness and readiness for Kubernetes probes.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the service is live (process running).
    /// Always true after startup initialization.
    live: AtomicBool,
    /// Whether the service is ready to serve traffic.
    /// Cleared when shutdown begins so load balancers stop routing here.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Shared state for the probe handlers.
#[derive(Clone)]
struct ProbeState {
    health: Arc<HealthState>,
    coordinator: PresenceCoordinatorActorHandle,
}

/// Create the health router with liveness and readiness endpoints.
///
/// # Endpoints
///
/// - `GET /health` - Returns 200 if process is running (liveness)
/// - `GET /ready` - Returns 200 if the listener is up AND the coordinator
///   actor answers its stats op, 503 otherwise (readiness)
pub fn health_router(
    health_state: Arc<HealthState>,
    coordinator: PresenceCoordinatorActorHandle,
) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(ProbeState {
            health: health_state,
            coordinator,
        })
}

/// Liveness probe handler.
///
/// Returns 200 OK if the process is running.
/// Kubernetes uses this to determine if the pod should be restarted.
async fn liveness_handler(State(state): State<ProbeState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler.
///
/// Returns 200 OK only when the readiness flag is set and the coordinator
/// actor answers within [`READINESS_PROBE_TIMEOUT`]. A cancelled or wedged
/// coordinator fails the probe, which takes the pod out of rotation even
/// if the HTTP listener is still accepting.
async fn readiness_handler(State(state): State<ProbeState>) -> StatusCode {
    if !state.health.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match tokio::time::timeout(READINESS_PROBE_TIMEOUT, state.coordinator.get_stats()).await {
        Ok(Ok(_)) => StatusCode::OK,
        Ok(Err(e)) => {
            warn!(
                target: "pc.service",
                error = %e,
                "Readiness probe: coordinator stats op failed"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(_) => {
            warn!(
                target: "pc.service",
                timeout_ms = READINESS_PROBE_TIMEOUT.as_millis() as u64,
                "Readiness probe: coordinator stats op timed out"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
