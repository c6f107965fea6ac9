// src/booking.rs
//
// The single write path for putting an appointment into a slot. Public,
// patient-portal, reschedule and staff-accept flows all go through here.
// Callers hold a transaction; locks are transaction-scoped advisory locks,
// always taken branch-day first, then patient-day.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    auth::generate_ticket,
    db::is_unique_violation,
    error::ApiError,
    mailer::{ClinicContact, pending_appointment_email},
    matching::{self, PatientCandidate, PatientMatch},
    models::{APPOINTMENT_VIEW_SELECT, AppState, AppointmentView, AppointmentViewRow},
    scheduling::BookingRules,
    status::{AppointmentStatus, OCCUPYING_SQL, SAME_DAY_BLOCKING_SQL},
    validation::PatientDetails,
};

pub const BOOKING_TYPE_ONLINE: &str = "online";

const SLOT_INDEX: &str = "appointment_slot_occupied_uq";
const TICKET_INDEX: &str = "appointment_appointment_ticket_key";

#[derive(Debug, Clone, Copy)]
pub struct SlotRequest {
    pub branch_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
    pub time_slot_id: i16,
}

async fn advisory_lock(conn: &mut PgConnection, key: &str) -> Result<(), ApiError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(conn)
        .await
        .map_err(ApiError::db)?;
    Ok(())
}

pub async fn lock_branch_day(
    conn: &mut PgConnection,
    branch_id: Uuid,
    date: NaiveDate,
) -> Result<(), ApiError> {
    advisory_lock(conn, &format!("branch-day:{branch_id}:{date}")).await
}

pub async fn lock_patient_day(
    conn: &mut PgConnection,
    patient_id: Uuid,
    date: NaiveDate,
) -> Result<(), ApiError> {
    advisory_lock(conn, &format!("patient-day:{patient_id}:{date}")).await
}

pub async fn slot_time(conn: &mut PgConnection, time_slot_id: i16) -> Result<NaiveTime, ApiError> {
    sqlx::query_scalar::<_, NaiveTime>(
        r#"
        SELECT slot_time
        FROM time_slot
        WHERE time_slot_id = $1
        "#,
    )
    .bind(time_slot_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::BadRequest("VALIDATION_ERROR", "Unknown time slot".into()))
}

async fn ensure_branch_and_service(
    conn: &mut PgConnection,
    branch_id: Uuid,
    service_id: Uuid,
) -> Result<(), ApiError> {
    let (branch_ok, service_ok): (bool, bool) = sqlx::query_as(
        r#"
        SELECT
          EXISTS (SELECT 1 FROM branch WHERE branch_id = $1),
          EXISTS (SELECT 1 FROM services WHERE service_id = $2 AND deleted_at IS NULL)
        "#,
    )
    .bind(branch_id)
    .bind(service_id)
    .fetch_one(conn)
    .await
    .map_err(ApiError::db)?;

    if !branch_ok {
        return Err(ApiError::not_found("branch"));
    }
    if !service_ok {
        return Err(ApiError::not_found("service"));
    }
    Ok(())
}

/// One non-canceled, non-rejected appointment per patient per day.
pub async fn ensure_patient_day_free(
    conn: &mut PgConnection,
    patient_id: Uuid,
    date: NaiveDate,
    exclude: Option<Uuid>,
) -> Result<(), ApiError> {
    let taken: bool = sqlx::query_scalar(&format!(
        r#"
        SELECT EXISTS (
          SELECT 1
          FROM appointment
          WHERE patient_id = $1
            AND appointment_date = $2
            AND deleted_at IS NULL
            AND status IN {SAME_DAY_BLOCKING_SQL}
            AND ($3::uuid IS NULL OR appointment_id <> $3)
        )
        "#
    ))
    .bind(patient_id)
    .bind(date)
    .bind(exclude)
    .fetch_one(conn)
    .await
    .map_err(ApiError::db)?;

    if taken {
        return Err(ApiError::Conflict(
            "PATIENT_DAY_TAKEN",
            "Patient already has an appointment on this date.".into(),
        ));
    }
    Ok(())
}

/// Runs the slot rules against current occupancy. Caller must hold the branch-day lock.
pub async fn ensure_slot_open(
    conn: &mut PgConnection,
    rules: &BookingRules,
    now: DateTime<Utc>,
    branch_id: Uuid,
    date: NaiveDate,
    time_slot_id: i16,
    exclude: Option<Uuid>,
) -> Result<(), ApiError> {
    let time = slot_time(&mut *conn, time_slot_id).await?;

    let (slot_booked, day_booked): (i64, i64) = sqlx::query_as(&format!(
        r#"
        SELECT
          count(*) FILTER (WHERE time_slot_id = $3),
          count(*)
        FROM appointment
        WHERE branch_id = $1
          AND appointment_date = $2
          AND deleted_at IS NULL
          AND status IN {OCCUPYING_SQL}
          AND ($4::uuid IS NULL OR appointment_id <> $4)
        "#
    ))
    .bind(branch_id)
    .bind(date)
    .bind(time_slot_id)
    .bind(exclude)
    .fetch_one(conn)
    .await
    .map_err(ApiError::db)?;

    rules
        .check_slot(date, time, rules.clinic_now(now), slot_booked, day_booked)
        .map_err(|rejection| {
            let msg = rejection.message(rules);
            if rejection.is_conflict() {
                ApiError::Conflict(rejection.code(), msg)
            } else {
                ApiError::BadRequest(rejection.code(), msg)
            }
        })
}

fn constraint_conflict(constraint: &str) -> Option<ApiError> {
    match constraint {
        SLOT_INDEX => Some(ApiError::Conflict(
            "SLOT_TAKEN",
            "the selected time slot is no longer available".into(),
        )),
        TICKET_INDEX => Some(ApiError::Conflict(
            "TICKET_TAKEN",
            "could not issue a unique appointment ticket, please try again".into(),
        )),
        _ => None,
    }
}

/// Maps unique violations on the occupied-slot and ticket indexes to `Conflict`.
pub fn appointment_write_error(e: sqlx::Error) -> ApiError {
    if is_unique_violation(&e) {
        let conflict = e
            .as_database_error()
            .and_then(|d| d.constraint())
            .and_then(constraint_conflict);
        if let Some(conflict) = conflict {
            return conflict;
        }
    }
    ApiError::db(e)
}

/// Inserts a Pending appointment after every rule has passed. Returns the new id.
pub async fn place_appointment(
    conn: &mut PgConnection,
    rules: &BookingRules,
    now: DateTime<Utc>,
    patient_id: Uuid,
    req: SlotRequest,
) -> Result<Uuid, ApiError> {
    ensure_branch_and_service(&mut *conn, req.branch_id, req.service_id).await?;

    lock_branch_day(&mut *conn, req.branch_id, req.date).await?;
    lock_patient_day(&mut *conn, patient_id, req.date).await?;

    ensure_patient_day_free(&mut *conn, patient_id, req.date, None).await?;
    ensure_slot_open(
        &mut *conn,
        rules,
        now,
        req.branch_id,
        req.date,
        req.time_slot_id,
        None,
    )
    .await?;

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment
            (appointment_ticket, patient_id, service_id, branch_id,
             appointment_date, time_slot_id, booking_type, status)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING appointment_id
        "#,
    )
    .bind(generate_ticket())
    .bind(patient_id)
    .bind(req.service_id)
    .bind(req.branch_id)
    .bind(req.date)
    .bind(req.time_slot_id)
    .bind(BOOKING_TYPE_ONLINE)
    .bind(AppointmentStatus::Pending.as_i16())
    .fetch_one(conn)
    .await
    .map_err(appointment_write_error)?;

    tracing::info!(%appointment_id, %patient_id, branch_id = %req.branch_id, date = %req.date, "appointment booked");
    Ok(appointment_id)
}

/// Finds the patient these details describe, or creates one with its address.
pub async fn find_or_create_patient(
    conn: &mut PgConnection,
    details: &PatientDetails,
) -> Result<(Uuid, Option<Uuid>), ApiError> {
    advisory_lock(
        &mut *conn,
        &format!("patient-match:{}:{}", details.dob, details.email),
    )
    .await?;

    let candidates: Vec<PatientCandidate> = sqlx::query_as::<_, PatientCandidate>(
        r#"
        SELECT patient_id, name, user_id
        FROM patient
        WHERE deleted_at IS NULL
          AND dob = $1
          AND (lower(email) = $2 OR phone_number = $3)
        ORDER BY created_at ASC
        "#,
    )
    .bind(details.dob)
    .bind(&details.email)
    .bind(&details.phone_number)
    .fetch_all(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    tracing::debug!(candidates = candidates.len(), dob = %details.dob, "patient candidates loaded");

    match matching::resolve(&candidates, &details.name) {
        PatientMatch::Existing { patient_id, user_id } => Ok((patient_id, user_id)),
        PatientMatch::Ambiguous(n) => {
            tracing::warn!(matches = n, "ambiguous patient match");
            Err(ApiError::Conflict(
                "MULTIPLE_PATIENTS_MATCH",
                "Multiple patients found with the same details. Consider refining the search."
                    .into(),
            ))
        }
        PatientMatch::NoMatch => {
            let address_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO addresses (address, latitude, longitude)
                VALUES ($1, $2, $3)
                RETURNING address_id
                "#,
            )
            .bind(&details.address)
            .bind(details.latitude)
            .bind(details.longitude)
            .fetch_one(&mut *conn)
            .await
            .map_err(ApiError::db)?;

            let patient_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO patient
                    (name, dob, email, phone_number, sex, status, address_id)
                VALUES
                    ($1, $2, $3, $4, $5, 'active', $6)
                RETURNING patient_id
                "#,
            )
            .bind(&details.name)
            .bind(details.dob)
            .bind(&details.email)
            .bind(&details.phone_number)
            .bind(&details.sex)
            .bind(address_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(ApiError::db)?;

            tracing::info!(%patient_id, "patient created");
            Ok((patient_id, None))
        }
    }
}

pub async fn load_view(
    conn: &mut PgConnection,
    appointment_id: Uuid,
) -> Result<AppointmentView, ApiError> {
    let row: AppointmentViewRow = sqlx::query_as::<_, AppointmentViewRow>(&format!(
        "{APPOINTMENT_VIEW_SELECT} WHERE a.appointment_id = $1 AND a.deleted_at IS NULL"
    ))
    .bind(appointment_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("appointment"))?;

    Ok(row.into())
}

pub async fn load_clinic_contact(state: &AppState) -> Result<ClinicContact, ApiError> {
    let row: Option<(String, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT clinic_name, contact_email, facebook_url
        FROM clinic_settings
        WHERE singleton_id = TRUE
        "#,
    )
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(match row {
        Some((clinic_name, contact_email, facebook_url)) => ClinicContact {
            clinic_name,
            contact_email,
            facebook_url,
        },
        None => ClinicContact {
            clinic_name: "Clinic".to_string(),
            contact_email: None,
            facebook_url: None,
        },
    })
}

/// Best-effort: a mail failure is logged and never surfaces to the caller.
pub async fn notify_pending(state: &AppState, view: &AppointmentView) {
    let clinic = match load_clinic_contact(state).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = ?e, "could not load clinic contact for email");
            return;
        }
    };

    let sent = match pending_appointment_email(
        &state.mail_from,
        &clinic,
        &view.patient_email,
        &view.appointment_ticket,
        &view.summary(),
    ) {
        Ok(email) => state.mailer.send(email).await,
        Err(e) => Err(e),
    };

    if let Err(e) = sent {
        tracing::warn!(error = %e, appointment_id = %view.appointment_id, "pending appointment email failed");
    }
}
