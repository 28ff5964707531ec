//! Health endpoints for the broadcast service.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the media engine reachable, and are
//!   we accepting new signaling connections?)
//!
//! The `/metrics` endpoint is merged onto the same router in `main.rs` and
//! rendered by `metrics-exporter-prometheus`.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the broadcast service.
///
/// Ready means the media engine connection is up and the service has not
/// started draining for shutdown.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    engine_connected: AtomicBool,
    draining: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live, engine not yet connected).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            engine_connected: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    /// Record that the media engine connection is established.
    pub fn set_engine_connected(&self) {
        self.engine_connected.store(true, Ordering::SeqCst);
    }

    /// Record that the media engine connection was lost.
    pub fn set_engine_disconnected(&self) {
        self.engine_connected.store(false, Ordering::SeqCst);
    }

    /// Stop reporting live. The process cannot recover on its own and
    /// should be restarted.
    pub fn set_not_live(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// Stop reporting ready (shutdown in progress).
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_engine_connected(&self) -> bool {
        self.engine_connected.load(Ordering::SeqCst)
    }

    /// Check if the service is ready to take signaling traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_engine_connected() && !self.draining.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
