// Health and metrics routes

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use foreman_engine::{ComponentHealth, HealthSnapshot, MetricsSnapshot};

use crate::workflows::AppState;

/// Health response body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ComponentHealth,
    pub version: &'static str,
    pub components: HealthSnapshot,
}

/// Create ops routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/metrics", get(metrics))
        .with_state(state)
}

/// GET /health - Component health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "All components healthy or degraded"),
        (status = 503, description = "At least one component unhealthy")
    ),
    tag = "ops"
)]
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let components = state.engine.health().await;
    let status = components.overall();
    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        components,
    };
    match status {
        ComponentHealth::Unhealthy => Err((StatusCode::SERVICE_UNAVAILABLE, Json(response))),
        _ => Ok(Json(response)),
    }
}

/// GET /v1/metrics - Typed metrics snapshot
#[utoipa::path(
    get,
    path = "/v1/metrics",
    responses(
        (status = 200, description = "Current counts, durations and costs")
    ),
    tag = "ops"
)]
pub async fn metrics(
    State(state): State<AppState>,
) -> Result<Json<MetricsSnapshot>, StatusCode> {
    state.engine.metrics().await.map(Json).map_err(|err| {
        tracing::error!(error = %err, "metrics snapshot failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
