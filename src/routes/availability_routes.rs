// src/routes/availability_routes.rs

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{ApiOk, AppState, TimeSlotRow},
    scheduling::{CalendarDay, DayLoad, SlotAvailability, parse_date},
    status::OCCUPYING_SQL,
};

const MAX_CALENDAR_DAYS: i64 = 62;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/timeslots", get(list_time_slots))
        .route("/branches/{branch_id}/slots/tomorrow", get(branch_tomorrow_slots))
        .route("/availability", get(availability_calendar))
}

#[derive(Debug, Deserialize)]
pub struct TimeSlotQuery {
    pub date: Option<String>,
    pub branch: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TimeSlotsData {
    pub date: NaiveDate,
    pub branch_id: Option<Uuid>,
    pub slots: Vec<SlotAvailability>,
}

#[derive(Debug, Serialize)]
pub struct TomorrowData {
    pub branch_id: Uuid,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub load: DayLoad,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub branch: Uuid,
    pub from: Option<String>,
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CalendarData {
    pub branch_id: Uuid,
    pub days: Vec<CalendarDay>,
}

fn required_date(raw: Option<&str>, field: &str) -> Result<NaiveDate, ApiError> {
    let raw = raw.ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", format!("{field} is required"))
    })?;
    parse_date(raw).ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", format!("{field} must be YYYY-MM-DD"))
    })
}

async fn ensure_branch(state: &AppState, branch_id: Uuid) -> Result<(), ApiError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM branch WHERE branch_id = $1)")
        .bind(branch_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;
    if exists {
        Ok(())
    } else {
        Err(ApiError::not_found("branch"))
    }
}

async fn occupying_on(state: &AppState, branch_id: Uuid, date: NaiveDate) -> Result<i64, ApiError> {
    sqlx::query_scalar::<_, i64>(&format!(
        r#"
        SELECT count(*)
        FROM appointment
        WHERE branch_id = $1
          AND appointment_date = $2
          AND deleted_at IS NULL
          AND status IN {OCCUPYING_SQL}
        "#
    ))
    .bind(branch_id)
    .bind(date)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)
}

/// GET /api/v1/timeslots?date=YYYY-MM-DD&branch=<uuid>
pub async fn list_time_slots(
    State(state): State<AppState>,
    Query(q): Query<TimeSlotQuery>,
) -> Result<Json<ApiOk<TimeSlotsData>>, ApiError> {
    let date = required_date(q.date.as_deref(), "date")?;

    let slots: Vec<TimeSlotRow> = sqlx::query_as::<_, TimeSlotRow>(
        r#"
        SELECT time_slot_id, slot_time
        FROM time_slot
        ORDER BY slot_time ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    // Without a branch, bookings are counted across all branches.
    let counts: Vec<(i16, i64)> = sqlx::query_as(&format!(
        r#"
        SELECT time_slot_id, count(*)
        FROM appointment
        WHERE appointment_date = $1
          AND ($2::uuid IS NULL OR branch_id = $2)
          AND deleted_at IS NULL
          AND status IN {OCCUPYING_SQL}
        GROUP BY time_slot_id
        "#
    ))
    .bind(date)
    .bind(q.branch)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let booked: HashMap<i16, i64> = counts.into_iter().collect();
    let slot_times: Vec<_> = slots.iter().map(|s| (s.time_slot_id, s.slot_time)).collect();
    let now_local = state.booking.clinic_now(Utc::now());

    Ok(Json(ApiOk {
        data: TimeSlotsData {
            date,
            branch_id: q.branch,
            slots: state.booking.evaluate_slots(date, now_local, &slot_times, &booked),
        },
    }))
}

/// GET /api/v1/branches/{branch_id}/slots/tomorrow
pub async fn branch_tomorrow_slots(
    State(state): State<AppState>,
    Path(branch_id): Path<Uuid>,
) -> Result<Json<ApiOk<TomorrowData>>, ApiError> {
    ensure_branch(&state, branch_id).await?;

    let date = state.booking.clinic_today(Utc::now()) + Duration::days(1);
    let booked = occupying_on(&state, branch_id, date).await?;

    Ok(Json(ApiOk {
        data: TomorrowData {
            branch_id,
            date,
            load: state.booking.day_load(booked),
        },
    }))
}

/// GET /api/v1/availability?branch=<uuid>&from=YYYY-MM-DD&days=N
pub async fn availability_calendar(
    State(state): State<AppState>,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<ApiOk<CalendarData>>, ApiError> {
    let today = state.booking.clinic_today(Utc::now());
    let from = match q.from.as_deref() {
        Some(raw) => required_date(Some(raw), "from")?,
        None => today,
    };
    // default covers today through the last bookable day
    let days = q.days.unwrap_or(state.booking.booking_window_days + 1);
    if !(1..=MAX_CALENDAR_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("days must be between 1 and {MAX_CALENDAR_DAYS}"),
        ));
    }

    ensure_branch(&state, q.branch).await?;

    let until = from + Duration::days(days - 1);
    let counts: Vec<(NaiveDate, i64)> = sqlx::query_as(&format!(
        r#"
        SELECT appointment_date, count(*)
        FROM appointment
        WHERE branch_id = $1
          AND appointment_date BETWEEN $2 AND $3
          AND deleted_at IS NULL
          AND status IN {OCCUPYING_SQL}
        GROUP BY appointment_date
        "#
    ))
    .bind(q.branch)
    .bind(from)
    .bind(until)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let booked: HashMap<NaiveDate, i64> = counts.into_iter().collect();

    Ok(Json(ApiOk {
        data: CalendarData {
            branch_id: q.branch,
            days: state.booking.calendar(from, days, today, &booked),
        },
    }))
}
