// src/routes/portal_routes.rs
//
// Patient-facing reads: dashboard, dental chart and own appointments.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    booking,
    dental_chart::{SortOrder, ToothHistoryEntry, ToothState, build_chart, sort_history},
    error::ApiError,
    middleware::auth_context::{AuthContext, Principal},
    models::{
        APPOINTMENT_VIEW_SELECT, AddressRow, ApiOk, AppState, AppointmentView, AppointmentViewRow,
        PATIENT_COLUMNS, PatientRow,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/portal/dashboard", get(dashboard))
        .route("/portal/dental-chart", get(dental_chart))
        .route("/portal/appointments", get(my_appointments))
}

#[derive(Debug, Serialize)]
pub struct DashboardData {
    pub patient: PatientRow,
    pub address: Option<AddressRow>,
    pub appointments: Vec<AppointmentView>,
    pub tooth_history: Vec<ToothHistoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Serialize)]
pub struct DentalChartData {
    pub teeth: Vec<ToothState>,
    pub history: Vec<ToothHistoryEntry>,
}

async fn patient_for_user(state: &AppState, user_id: Uuid) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patient WHERE user_id = $1 AND deleted_at IS NULL"
    ))
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("patient profile"))
}

async fn appointments_of(state: &AppState, patient_id: Uuid) -> Result<Vec<AppointmentView>, ApiError> {
    let rows: Vec<AppointmentViewRow> = sqlx::query_as::<_, AppointmentViewRow>(&format!(
        r#"
        {APPOINTMENT_VIEW_SELECT}
        WHERE a.patient_id = $1
          AND a.deleted_at IS NULL
        ORDER BY a.appointment_date DESC, ts.slot_time DESC
        "#
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(rows.into_iter().map(AppointmentView::from).collect())
}

/// Oldest first; callers re-sort for display.
pub async fn tooth_history_of(
    state: &AppState,
    patient_id: Uuid,
) -> Result<Vec<ToothHistoryEntry>, ApiError> {
    sqlx::query_as::<_, ToothHistoryEntry>(
        r#"
        SELECT
          th.tooth_history_id,
          th.appointment_id,
          th.tooth_location,
          th.tooth_condition,
          th.tooth_history,
          th.history_date,
          th.created_at,
          s.name AS service_name
        FROM tooth_history th
        LEFT JOIN appointment a ON a.appointment_id = th.appointment_id
        LEFT JOIN services s ON s.service_id = a.service_id
        WHERE th.patient_id = $1
          AND th.deleted_at IS NULL
        ORDER BY th.history_date ASC, th.created_at ASC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

/// GET /api/v1/portal/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<DashboardData>>, ApiError> {
    let user_id = auth.patient_user_id()?;
    let patient = patient_for_user(&state, user_id).await?;

    let address: Option<AddressRow> = match patient.address_id {
        Some(address_id) => sqlx::query_as::<_, AddressRow>(
            r#"
            SELECT address_id, address, latitude, longitude
            FROM addresses
            WHERE address_id = $1
            "#,
        )
        .bind(address_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?,
        None => None,
    };

    let appointments = appointments_of(&state, patient.patient_id).await?;
    let mut tooth_history = tooth_history_of(&state, patient.patient_id).await?;
    sort_history(&mut tooth_history, SortOrder::Desc);

    Ok(Json(ApiOk {
        data: DashboardData {
            patient,
            address,
            appointments,
            tooth_history,
        },
    }))
}

/// GET /api/v1/portal/dental-chart?order=desc|asc
pub async fn dental_chart(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ChartQuery>,
) -> Result<Json<ApiOk<DentalChartData>>, ApiError> {
    let user_id = auth.patient_user_id()?;
    let patient = patient_for_user(&state, user_id).await?;

    let mut history = tooth_history_of(&state, patient.patient_id).await?;
    let teeth = build_chart(&history);
    sort_history(&mut history, q.order);

    Ok(Json(ApiOk {
        data: DentalChartData { teeth, history },
    }))
}

/// GET /api/v1/portal/appointments
pub async fn my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentView>>>, ApiError> {
    let data = match auth.principal {
        Principal::Ticket { appointment_id } => {
            let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
            vec![booking::load_view(&mut *conn, appointment_id).await?]
        }
        Principal::User { .. } => {
            let user_id = auth.patient_user_id()?;
            let patient = patient_for_user(&state, user_id).await?;
            appointments_of(&state, patient.patient_id).await?
        }
    };

    Ok(Json(ApiOk { data }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_order_defaults_to_newest_first() {
        let q: ChartQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.order, SortOrder::Desc);
        let q: ChartQuery = serde_json::from_str(r#"{"order":"asc"}"#).unwrap();
        assert_eq!(q.order, SortOrder::Asc);
        assert!(serde_json::from_str::<ChartQuery>(r#"{"order":"sideways"}"#).is_err());
    }
}
