use axum::{Json, Router, extract::State, routing::get};

use crate::{
    error::ApiError,
    models::{ApiOk, AppState, StatusRow},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/statuses", get(list_statuses))
}

pub async fn list_statuses(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<StatusRow>>>, ApiError> {
    let rows: Vec<StatusRow> = sqlx::query_as::<_, StatusRow>(
        r#"
        SELECT status_id, name
        FROM appointment_status
        ORDER BY status_id ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}
