use crate::state::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub run_id: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

pub async fn root() -> &'static str {
    "SimOpt Hive API v0.1"
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        run_id: state.run_id.to_string(),
        model: state.model_name.clone(),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}
