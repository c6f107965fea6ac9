// src/routes/service_routes.rs

use axum::{Json, Router, extract::State, routing::get};

use crate::{
    error::ApiError,
    models::{ApiOk, AppState, ServiceRow},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_services))
}

pub async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<ServiceRow>>>, ApiError> {
    let rows: Vec<ServiceRow> = sqlx::query_as::<_, ServiceRow>(
        r#"
        SELECT
          service_id,
          name,
          description,
          price_cents,
          created_at,
          updated_at
        FROM services
        WHERE deleted_at IS NULL
        ORDER BY name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}
