use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::models::{ApiOk, AppState};

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Liveness only; never touches the database.
pub async fn health() -> Json<ApiOk<HealthData>> {
    Json(ApiOk {
        data: HealthData { status: "ok" },
    })
}
