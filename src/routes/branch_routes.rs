// src/routes/branch_routes.rs

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    geo::{nearest, valid_coordinates},
    models::{ApiOk, AppState, BranchRow},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/branches", get(list_branches))
        .route("/branches/nearest", get(nearest_branch))
}

#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize)]
pub struct NearestBranch {
    #[serde(flatten)]
    pub branch: BranchRow,
    pub distance_km: f64,
}

async fn load_branches(state: &AppState) -> Result<Vec<BranchRow>, ApiError> {
    sqlx::query_as::<_, BranchRow>(
        r#"
        SELECT b.branch_id, b.name, b.address_id, a.address, a.latitude, a.longitude
        FROM branch b
        JOIN addresses a ON a.address_id = b.address_id
        ORDER BY b.branch_id ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

pub async fn list_branches(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<Vec<BranchRow>>>, ApiError> {
    let mut rows = load_branches(&state).await?;
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(ApiOk { data: rows }))
}

pub async fn nearest_branch(
    State(state): State<AppState>,
    Query(q): Query<NearestQuery>,
) -> Result<Json<ApiOk<NearestBranch>>, ApiError> {
    if !valid_coordinates(q.lat, q.lng) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "lat must be within [-90, 90] and lng within [-180, 180]".into(),
        ));
    }

    // id order so ties resolve the same way every time
    let branches = load_branches(&state).await?;
    let points: Vec<(f64, f64)> = branches.iter().map(|b| (b.latitude, b.longitude)).collect();

    let (idx, distance_km) =
        nearest((q.lat, q.lng), &points).ok_or_else(|| ApiError::not_found("branch"))?;

    let branch = branches
        .into_iter()
        .nth(idx)
        .ok_or_else(|| ApiError::Internal(format!("nearest index {idx} out of range")))?;

    Ok(Json(ApiOk {
        data: NearestBranch {
            branch,
            distance_km,
        },
    }))
}
