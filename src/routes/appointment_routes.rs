// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    booking::{self, SlotRequest},
    error::ApiError,
    middleware::auth_context::{AuthContext, Principal},
    models::{
        APPOINTMENT_VIEW_SELECT, ApiOk, AppState, AppointmentView, AppointmentViewRow,
        ROLE_PATIENT,
    },
    scheduling::{BookingRules, SlotRejection},
    status::AppointmentStatus,
    validation::{PatientDetailsInput, validate_patient_details},
};

const PAGE_SIZE: i64 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments/book", post(book_online))
        .route("/appointments", get(list_appointments).post(book_for_patient))
        .route("/appointments/{appointment_id}", get(get_appointment))
        .route("/appointments/{appointment_id}/reschedule", post(reschedule))
        .route("/appointments/{appointment_id}/cancel", post(cancel))
        .route("/appointments/{appointment_id}/status", post(set_status))
}

/* ============================================================
   Request DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BookOnlineRequest {
    #[serde(flatten)]
    pub patient: PatientDetailsInput,
    #[serde(flatten)]
    pub slot: SlotBody,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SlotBody {
    pub branch_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
    pub time_slot_id: i16,
}

impl From<SlotBody> for SlotRequest {
    fn from(b: SlotBody) -> Self {
        SlotRequest {
            branch_id: b.branch_id,
            service_id: b.service_id,
            date: b.date,
            time_slot_id: b.time_slot_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    pub time_slot_id: i16,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: i16,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub query: Option<String>,
    /// Comma separated status ids, e.g. `1,2`.
    pub status: Option<String>,
    pub branch: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentListResponse {
    pub data: Vec<AppointmentView>,
    pub count: i64,
}

/* ============================================================
   Helpers
   ============================================================ */

/// Rejects dates outside the booking window before touching the database.
fn ensure_in_window(rules: &BookingRules, date: NaiveDate, today: NaiveDate) -> Result<(), ApiError> {
    if rules.is_within_window(date, today) {
        Ok(())
    } else {
        let r = SlotRejection::OutsideWindow;
        Err(ApiError::BadRequest(r.code(), r.message(rules)))
    }
}

/// Owning patient account, or the ticket session scoped to this appointment.
fn is_owner(auth: &AuthContext, view: &AppointmentView) -> bool {
    match auth.principal {
        Principal::Ticket { appointment_id } => appointment_id == view.appointment_id,
        Principal::User { user_id, role } => {
            role == ROLE_PATIENT && view.patient_user_id == Some(user_id)
        }
    }
}

fn forbidden() -> ApiError {
    ApiError::Forbidden(
        "FORBIDDEN",
        "You do not have access to this appointment".into(),
    )
}

fn invalid_transition(from: AppointmentStatus, to: &str) -> ApiError {
    ApiError::Conflict(
        "INVALID_STATUS_TRANSITION",
        format!("Cannot {to} an appointment that is {}", from.name()),
    )
}

/// The date and slot a staff status change has to move the appointment to, if any.
fn requested_move(
    view: &AppointmentView,
    next: AppointmentStatus,
) -> Result<Option<(NaiveDate, i16)>, ApiError> {
    if view.status() != Some(AppointmentStatus::Rescheduled) || next != AppointmentStatus::Accepted {
        return Ok(None);
    }
    view.reschedule_request
        .as_ref()
        .and_then(|r| r.time_slot.as_ref().map(|slot| (r.date, slot.id)))
        .map(Some)
        .ok_or_else(|| {
            ApiError::Conflict(
                "INVALID_STATUS_TRANSITION",
                "Appointment has no pending reschedule request".into(),
            )
        })
}

fn parse_status_list(raw: &str) -> Result<Vec<i16>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i16>()
                .ok()
                .and_then(AppointmentStatus::from_i16)
                .map(AppointmentStatus::as_i16)
                .ok_or_else(|| {
                    ApiError::BadRequest("VALIDATION_ERROR", format!("unknown status: {s}"))
                })
        })
        .collect()
}

async fn lock_status(conn: &mut sqlx::PgConnection, appointment_id: Uuid) -> Result<AppointmentStatus, ApiError> {
    let raw: i16 = sqlx::query_scalar(
        r#"
        SELECT status
        FROM appointment
        WHERE appointment_id = $1
          AND deleted_at IS NULL
        FOR UPDATE
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("appointment"))?;

    AppointmentStatus::from_i16(raw)
        .ok_or_else(|| ApiError::Internal(format!("unknown status {raw} on {appointment_id}")))
}

fn spawn_pending_email(state: &AppState, view: &AppointmentView) {
    let state = state.clone();
    let view = view.clone();
    tokio::spawn(async move {
        booking::notify_pending(&state, &view).await;
    });
}

/* ============================================================
   POST /appointments/book (public)
   ============================================================ */

pub async fn book_online(
    State(state): State<AppState>,
    Json(req): Json<BookOnlineRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let now = Utc::now();
    let today = state.booking.clinic_today(now);

    let details = validate_patient_details(&req.patient, today)?;
    ensure_in_window(&state.booking, req.slot.date, today)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let (patient_id, _) = booking::find_or_create_patient(&mut *tx, &details).await?;
    let appointment_id =
        booking::place_appointment(&mut *tx, &state.booking, now, patient_id, req.slot.into())
            .await?;
    let view = booking::load_view(&mut *tx, appointment_id).await?;

    tx.commit().await.map_err(booking::appointment_write_error)?;

    spawn_pending_email(&state, &view);
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   POST /appointments (patient session)
   ============================================================ */

pub async fn book_for_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SlotBody>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let user_id = auth.patient_user_id()?;
    let now = Utc::now();
    ensure_in_window(&state.booking, req.date, state.booking.clinic_today(now))?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let patient_id: Uuid = sqlx::query_scalar(
        r#"
        SELECT patient_id
        FROM patient
        WHERE user_id = $1
          AND deleted_at IS NULL
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("patient profile"))?;

    let appointment_id =
        booking::place_appointment(&mut *tx, &state.booking, now, patient_id, req.into()).await?;
    let view = booking::load_view(&mut *tx, appointment_id).await?;

    tx.commit().await.map_err(booking::appointment_write_error)?;

    spawn_pending_email(&state, &view);
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let view = booking::load_view(&mut *conn, appointment_id).await?;

    if !auth.is_staff() && !is_owner(&auth, &view) {
        return Err(forbidden());
    }
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   POST /appointments/{id}/reschedule
   ============================================================ */

pub async fn reschedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let now = Utc::now();
    ensure_in_window(&state.booking, req.date, state.booking.clinic_today(now))?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current = booking::load_view(&mut *tx, appointment_id).await?;
    if !is_owner(&auth, &current) {
        return Err(forbidden());
    }
    if req.date == current.date && req.time_slot_id == current.time_slot.id {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "Choose a different date or time".into(),
        ));
    }

    booking::lock_branch_day(&mut *tx, current.branch.id, req.date).await?;
    booking::lock_patient_day(&mut *tx, current.patient.id, req.date).await?;

    let status = lock_status(&mut *tx, appointment_id).await?;
    if !status.patient_can_reschedule() {
        return Err(invalid_transition(status, "reschedule"));
    }

    booking::ensure_patient_day_free(&mut *tx, current.patient.id, req.date, Some(appointment_id))
        .await?;
    booking::ensure_slot_open(
        &mut *tx,
        &state.booking,
        now,
        current.branch.id,
        req.date,
        req.time_slot_id,
        Some(appointment_id),
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE appointment
        SET rescheduled_date = $2,
            rescheduled_time_slot_id = $3,
            status = $4,
            updated_at = now()
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(req.date)
    .bind(req.time_slot_id)
    .bind(AppointmentStatus::Rescheduled.as_i16())
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let view = booking::load_view(&mut *tx, appointment_id).await?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%appointment_id, date = %req.date, time_slot_id = req.time_slot_id, "reschedule requested");
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   POST /appointments/{id}/cancel
   ============================================================ */

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current = booking::load_view(&mut *tx, appointment_id).await?;
    if !auth.is_staff() && !is_owner(&auth, &current) {
        return Err(forbidden());
    }

    let status = lock_status(&mut *tx, appointment_id).await?;
    if !status.can_cancel() {
        return Err(invalid_transition(status, "cancel"));
    }

    sqlx::query(
        r#"
        UPDATE appointment
        SET status = $2,
            updated_at = now()
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(AppointmentStatus::Canceled.as_i16())
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let view = booking::load_view(&mut *tx, appointment_id).await?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%appointment_id, "appointment canceled");
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   GET /appointments (staff)
   ============================================================ */

struct ListFilters {
    name: Option<String>,
    statuses: Vec<i16>,
    branch: Option<Uuid>,
    date: Option<NaiveDate>,
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, f: &ListFilters) {
    qb.push(" WHERE a.deleted_at IS NULL");
    if let Some(name) = &f.name {
        qb.push(" AND p.name ILIKE ").push_bind(format!("%{name}%"));
    }
    if !f.statuses.is_empty() {
        qb.push(" AND a.status = ANY(")
            .push_bind(f.statuses.clone())
            .push(")");
    }
    if let Some(branch) = f.branch {
        qb.push(" AND a.branch_id = ").push_bind(branch);
    }
    if let Some(date) = f.date {
        qb.push(" AND a.appointment_date = ").push_bind(date);
    }
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<AppointmentListResponse>, ApiError> {
    auth.ensure_staff()?;

    if let Some(page) = q.page {
        if page < 1 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "page must be >= 1".into(),
            ));
        }
    }

    let filters = ListFilters {
        name: q
            .query
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        statuses: match q.status.as_deref() {
            Some(raw) => parse_status_list(raw)?,
            None => Vec::new(),
        },
        branch: q.branch,
        date: q.date,
    };

    let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        SELECT count(*)
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        "#,
    );
    push_filters(&mut count_qb, &filters);
    let count: i64 = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(APPOINTMENT_VIEW_SELECT);
    push_filters(&mut qb, &filters);
    qb.push(" ORDER BY a.appointment_date DESC, ts.slot_time ASC, a.created_at ASC");
    if let Some(page) = q.page {
        qb.push(" LIMIT ")
            .push_bind(PAGE_SIZE)
            .push(" OFFSET ")
            .push_bind((page - 1) * PAGE_SIZE);
    }

    let rows: Vec<AppointmentViewRow> = qb
        .build_query_as::<AppointmentViewRow>()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(AppointmentListResponse {
        data: rows.into_iter().map(AppointmentView::from).collect(),
        count,
    }))
}

/* ============================================================
   POST /appointments/{id}/status (admin/manager/receptionist)
   ============================================================ */

pub async fn set_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    auth.ensure_manage_appointments()?;

    let next = AppointmentStatus::from_i16(req.status).ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", format!("unknown status: {}", req.status))
    })?;

    let now = Utc::now();
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current = booking::load_view(&mut *tx, appointment_id).await?;

    // Accepting a reschedule request moves the appointment; lock the target day first.
    let target = requested_move(&current, next)?;
    if let Some((date, _)) = target {
        booking::lock_branch_day(&mut *tx, current.branch.id, date).await?;
        booking::lock_patient_day(&mut *tx, current.patient.id, date).await?;
    }

    let status = lock_status(&mut *tx, appointment_id).await?;
    if status.is_terminal() {
        return Err(ApiError::Conflict(
            "INVALID_STATUS_TRANSITION",
            format!("Appointment is already {}", status.name()),
        ));
    }
    if !status.staff_can_move_to(next) {
        return Err(invalid_transition(status, &format!("move to {}", next.name())));
    }

    // The row is locked now; the request must still be the one the day locks cover.
    let locked = booking::load_view(&mut *tx, appointment_id).await?;
    if requested_move(&locked, next)? != target {
        return Err(ApiError::Conflict(
            "APPOINTMENT_CHANGED",
            "The appointment changed while it was being updated. Reload and try again.".into(),
        ));
    }

    match target {
        Some((date, slot_id)) => {
            booking::ensure_patient_day_free(&mut *tx, current.patient.id, date, Some(appointment_id))
                .await?;
            booking::ensure_slot_open(
                &mut *tx,
                &state.booking,
                now,
                current.branch.id,
                date,
                slot_id,
                Some(appointment_id),
            )
            .await?;

            sqlx::query(
                r#"
                UPDATE appointment
                SET appointment_date = $2,
                    time_slot_id = $3,
                    rescheduled_date = NULL,
                    rescheduled_time_slot_id = NULL,
                    status = $4,
                    updated_at = now()
                WHERE appointment_id = $1
                "#,
            )
            .bind(appointment_id)
            .bind(date)
            .bind(slot_id)
            .bind(next.as_i16())
            .execute(&mut *tx)
            .await
            .map_err(booking::appointment_write_error)?;
        }
        _ => {
            sqlx::query(
                r#"
                UPDATE appointment
                SET status = $2,
                    updated_at = now()
                WHERE appointment_id = $1
                "#,
            )
            .bind(appointment_id)
            .bind(next.as_i16())
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db)?;
        }
    }

    let view = booking::load_view(&mut *tx, appointment_id).await?;
    tx.commit().await.map_err(booking::appointment_write_error)?;

    tracing::info!(%appointment_id, from = status.name(), to = next.name(), "appointment status changed");
    Ok(Json(ApiOk { data: view }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_list_parses_known_ids() {
        assert_eq!(parse_status_list("1, 2,6").unwrap(), vec![1, 2, 6]);
        assert_eq!(parse_status_list("").unwrap(), Vec::<i16>::new());
        assert!(parse_status_list("1,9").is_err());
        assert!(parse_status_list("pending").is_err());
    }

    #[test]
    fn window_precheck_rejects_far_dates() {
        let rules = BookingRules::default();
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert!(ensure_in_window(&rules, today, today).is_ok());
        let far = today + chrono::Duration::days(31);
        match ensure_in_window(&rules, far, today) {
            Err(ApiError::BadRequest(code, _)) => assert_eq!(code, "DATE_OUT_OF_RANGE"),
            other => panic!("unexpected {other:?}"),
        }
        let past = today - chrono::Duration::days(1);
        assert!(ensure_in_window(&rules, past, today).is_err());
    }

    fn view(status: AppointmentStatus, request: Option<(NaiveDate, i16)>) -> AppointmentView {
        use crate::models::{BranchRef, NamedRef, RescheduleRequestView, ServiceRef, SlotRef, StatusRef};
        let ten = chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        AppointmentView {
            appointment_id: Uuid::nil(),
            appointment_ticket: "APT-TEST".into(),
            date: NaiveDate::from_ymd_opt(2026, 10, 22).unwrap(),
            time_slot: SlotRef { id: 3, time: ten },
            status: StatusRef { id: status.as_i16(), name: status.name().into() },
            booking_type: "online".into(),
            patient: NamedRef { id: Uuid::nil(), name: "Maria Santos".into() },
            service: ServiceRef { id: Uuid::nil(), name: "Cleaning".into(), price_cents: 0 },
            branch: BranchRef { id: Uuid::nil(), name: "Main".into(), address: "Rizal St".into() },
            reschedule_request: request.map(|(date, id)| RescheduleRequestView {
                date,
                time_slot: Some(SlotRef { id, time: ten }),
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            patient_email: "maria@example.com".into(),
            patient_user_id: None,
        }
    }

    #[test]
    fn accepting_a_reschedule_targets_the_requested_slot() {
        let moved = NaiveDate::from_ymd_opt(2026, 10, 23).unwrap();
        let requested = view(AppointmentStatus::Rescheduled, Some((moved, 5)));

        assert_eq!(
            requested_move(&requested, AppointmentStatus::Accepted).unwrap(),
            Some((moved, 5))
        );
        assert_eq!(requested_move(&requested, AppointmentStatus::Rejected).unwrap(), None);

        let pending = view(AppointmentStatus::Pending, None);
        assert_eq!(requested_move(&pending, AppointmentStatus::Accepted).unwrap(), None);

        // A pending row that became a reschedule request no longer matches the unlocked read.
        assert_ne!(
            requested_move(&pending, AppointmentStatus::Accepted).unwrap(),
            requested_move(&requested, AppointmentStatus::Accepted).unwrap()
        );

        let broken = view(AppointmentStatus::Rescheduled, None);
        match requested_move(&broken, AppointmentStatus::Accepted) {
            Err(ApiError::Conflict(code, _)) => assert_eq!(code, "INVALID_STATUS_TRANSITION"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn booking_body_flattens_patient_and_slot() {
        let body = serde_json::json!({
            "name": "Maria Santos",
            "phone_number": 917123456,
            "email": "maria@example.com",
            "address": { "address": "12 Rizal St", "latitude": 14.6, "longitude": 121.0 },
            "sex": "female",
            "dob": "1990-05-01",
            "branch_id": Uuid::nil(),
            "service_id": Uuid::nil(),
            "date": "2026-10-20",
            "time_slot_id": 4
        });
        let req: BookOnlineRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.patient.phone_number, "917123456");
        assert_eq!(req.slot.time_slot_id, 4);
        assert_eq!(req.slot.date, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
    }
}
