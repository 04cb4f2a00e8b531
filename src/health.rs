use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{db, state::AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub database: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[instrument(skip(state))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = if db::ping(&state.db, Duration::from_secs(1)).await {
        "up"
    } else {
        "down"
    };
    let response = HealthResponse {
        status: if database == "up" { "healthy" } else { "degraded" },
        timestamp: OffsetDateTime::now_utc(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        database,
    };
    info!(status = response.status, uptime_secs = response.uptime_secs, "health check");
    Json(response)
}
