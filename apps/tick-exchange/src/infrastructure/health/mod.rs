//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, replay status reporting, and Prometheus
//! metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while the feed is replaying)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{FeedState, ReplayPhase};
use crate::domain::subscription::SharedRegistry;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Exchange version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Replay feed status.
    pub feed: FeedInfo,
    /// Subscriber statistics.
    pub subscribers: SubscriberInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed is replaying.
    Healthy,
    /// Feed has finished; the exchange is winding down.
    Degraded,
    /// Feed failed.
    Unhealthy,
}

/// Replay feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Replay phase.
    pub state: &'static str,
    /// Replay start time.
    pub started_at: DateTime<Utc>,
    /// Ticks aggregated so far.
    pub ticks_ingested: u64,
    /// Batches aggregated so far.
    pub batches: u64,
    /// Timestamp key of the latest batch.
    pub last_timestamp_key: i64,
    /// Failure reason, if the feed failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Subscriber statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    /// Registered subscribers.
    pub active: usize,
    /// Per-subscriber buffer capacity.
    pub buffer_capacity: usize,
    /// Bars broadcast.
    pub bars_broadcast: u64,
    /// Bars dropped across all subscribers.
    pub bars_dropped: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    registry: SharedRegistry,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, feed: Arc<FeedState>, registry: SharedRegistry) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            registry,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.phase() == ReplayPhase::Replaying && !state.registry.is_closed() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let phase = state.feed.phase();
    let stats = state.registry.stats();

    HealthResponse {
        status: determine_health_status(phase),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: FeedInfo {
            state: phase.as_str(),
            started_at: state.feed.started_at(),
            ticks_ingested: state.feed.ticks_ingested(),
            batches: state.feed.batches_emitted(),
            last_timestamp_key: state.feed.last_timestamp_key(),
            error: state.feed.error_message(),
        },
        subscribers: SubscriberInfo {
            active: stats.subscribers,
            buffer_capacity: state.registry.capacity(),
            bars_broadcast: stats.bars_broadcast,
            bars_dropped: stats.bars_dropped,
        },
    }
}

const fn determine_health_status(phase: ReplayPhase) -> HealthStatus {
    match phase {
        ReplayPhase::Starting | ReplayPhase::Replaying => HealthStatus::Healthy,
        ReplayPhase::Finished => HealthStatus::Degraded,
        ReplayPhase::Failed => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriberRegistry;

    fn state() -> HealthServerState {
        HealthServerState::new(
            "0.1.0".to_string(),
            Arc::new(FeedState::new()),
            Arc::new(SubscriberRegistry::new(8)),
        )
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_replay_phase() {
        assert_eq!(
            determine_health_status(ReplayPhase::Replaying),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(ReplayPhase::Finished),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(ReplayPhase::Failed),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn response_reports_feed_and_subscribers() {
        let state = state();
        let _sub = state.registry.subscribe().unwrap();
        state.feed.set_phase(ReplayPhase::Replaying);
        state.feed.record_batch(4, 100_001);

        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.feed.state, "replaying");
        assert_eq!(response.feed.ticks_ingested, 4);
        assert_eq!(response.feed.last_timestamp_key, 100_001);
        assert_eq!(response.subscribers.active, 1);
        assert_eq!(response.subscribers.buffer_capacity, 8);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["feed"].get("error").is_none());
    }

    #[test]
    fn failed_feed_reports_error() {
        let state = state();
        state.feed.set_error("malformed record at line 3".to_string());

        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(
            response.feed.error.as_deref(),
            Some("malformed record at line 3")
        );
    }

    #[tokio::test]
    async fn readiness_tracks_replay() {
        let state = Arc::new(state());

        let response = readiness_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.feed.set_phase(ReplayPhase::Replaying);
        let response = readiness_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        state.registry.close();
        let response = readiness_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
