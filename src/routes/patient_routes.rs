// src/routes/patient_routes.rs
//
// Staff-side patient lookup and chart entry.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    dental_chart::{ToothHistoryEntry, is_known_condition, is_valid_location},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, PATIENT_COLUMNS, PatientRow},
};

const SEARCH_LIMIT: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(search_patients))
        .route("/patients/{patient_id}/tooth_history", post(record_tooth_history))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToothHistoryRequest {
    pub tooth_location: i16,
    pub tooth_condition: String,
    pub tooth_history: Option<String>,
    pub history_date: Option<NaiveDate>,
    pub appointment_id: Option<Uuid>,
}

fn validate_tooth_entry(req: &ToothHistoryRequest) -> Result<String, ApiError> {
    if !is_valid_location(req.tooth_location) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "tooth_location must be between 1 and 32".into(),
        ));
    }
    let condition = req.tooth_condition.trim().to_lowercase();
    if !is_known_condition(&condition) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("unknown tooth_condition: {}", req.tooth_condition),
        ));
    }
    Ok(condition)
}

/// GET /api/v1/patients?query=
pub async fn search_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<PatientRow>>>, ApiError> {
    auth.ensure_staff()?;

    let needle = q.query.as_deref().map(str::trim).unwrap_or_default();
    let pattern = format!("%{needle}%");

    let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE deleted_at IS NULL
          AND (name ILIKE $1 OR email ILIKE $1 OR phone_number ILIKE $1)
        ORDER BY name ASC
        LIMIT $2
        "#
    ))
    .bind(&pattern)
    .bind(SEARCH_LIMIT)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

/// POST /api/v1/patients/{patient_id}/tooth_history
pub async fn record_tooth_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<ToothHistoryRequest>,
) -> Result<Json<ApiOk<ToothHistoryEntry>>, ApiError> {
    auth.ensure_staff()?;
    let condition = validate_tooth_entry(&req)?;
    let history_date = req
        .history_date
        .unwrap_or_else(|| state.booking.clinic_today(Utc::now()));

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM patient WHERE patient_id = $1 AND deleted_at IS NULL)",
    )
    .bind(patient_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    if !exists {
        return Err(ApiError::not_found("patient"));
    }

    if let Some(appointment_id) = req.appointment_id {
        let owned: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
              SELECT 1 FROM appointment
              WHERE appointment_id = $1 AND patient_id = $2 AND deleted_at IS NULL
            )
            "#,
        )
        .bind(appointment_id)
        .bind(patient_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;
        if !owned {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "appointment does not belong to this patient".into(),
            ));
        }
    }

    let entry: ToothHistoryEntry = sqlx::query_as::<_, ToothHistoryEntry>(
        r#"
        WITH inserted AS (
          INSERT INTO tooth_history
              (patient_id, appointment_id, tooth_location, tooth_condition, tooth_history, history_date)
          VALUES
              ($1, $2, $3, $4, $5, $6)
          RETURNING tooth_history_id, appointment_id, tooth_location, tooth_condition, tooth_history, history_date, created_at
        )
        SELECT i.*, s.name AS service_name
        FROM inserted i
        LEFT JOIN appointment a ON a.appointment_id = i.appointment_id
        LEFT JOIN services s ON s.service_id = a.service_id
        "#,
    )
    .bind(patient_id)
    .bind(req.appointment_id)
    .bind(req.tooth_location)
    .bind(&condition)
    .bind(req.tooth_history.as_deref().map(str::trim).unwrap_or_default())
    .bind(history_date)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%patient_id, tooth = req.tooth_location, condition = %condition, "tooth history recorded");

    Ok(Json(ApiOk { data: entry }))
}
