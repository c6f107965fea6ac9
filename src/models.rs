use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::mailer::Mailer;
use crate::scheduling::BookingRules;
use crate::status::AppointmentStatus;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub patient_session_ttl_hours: i64,
    pub ticket_session_ttl_hours: i64,
    pub booking: BookingRules,
    pub mailer: Arc<dyn Mailer>,
    pub mail_from: String,
}

/* -------------------------
   Roles
--------------------------*/

// app_user.roles smallint
pub const ROLE_PATIENT: i16 = 0;
pub const ROLE_ADMIN: i16 = 1;
pub const ROLE_MANAGER: i16 = 2;
pub const ROLE_DENTIST: i16 = 3;
pub const ROLE_RECEPTIONIST: i16 = 4;

pub fn role_to_string(role: i16) -> String {
    match role {
        ROLE_PATIENT => "patient",
        ROLE_ADMIN => "admin",
        ROLE_MANAGER => "manager",
        ROLE_DENTIST => "dentist",
        ROLE_RECEPTIONIST => "receptionist",
        _ => "unknown",
    }
    .to_string()
}

pub fn is_staff_role(role: i16) -> bool {
    (ROLE_ADMIN..=ROLE_RECEPTIONIST).contains(&role)
}

/// Roles allowed to move appointments between statuses.
pub fn can_manage_appointments(role: i16) -> bool {
    matches!(role, ROLE_ADMIN | ROLE_MANAGER | ROLE_RECEPTIONIST)
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub clinic: ClinicProfile,
}

#[derive(Debug, Deserialize)]
pub struct TicketLoginRequest {
    pub ticket: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct TicketLoginData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub appointment_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    pub clinic_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceRow {
    pub service_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BranchRow {
    pub branch_id: Uuid,
    pub name: String,
    pub address_id: Uuid,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TimeSlotRow {
    pub time_slot_id: i16,
    pub slot_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusRow {
    pub status_id: i16,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AddressRow {
    pub address_id: Uuid,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub dob: NaiveDate,
    pub email: String,
    pub phone_number: String,
    pub sex: String,
    pub status: String,
    pub address_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PATIENT_COLUMNS: &str = "patient_id, user_id, name, dob, email, phone_number, sex, status, address_id, created_at, updated_at";

/* -------------------------
   Appointment view
--------------------------*/

/// Joined appointment row; every read path selects `APPOINTMENT_VIEW_SELECT`.
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentViewRow {
    pub appointment_id: Uuid,
    pub appointment_ticket: String,
    pub appointment_date: NaiveDate,
    pub booking_type: String,
    pub status: i16,
    pub status_name: String,
    pub time_slot_id: i16,
    pub slot_time: NaiveTime,
    pub rescheduled_date: Option<NaiveDate>,
    pub rescheduled_time_slot_id: Option<i16>,
    pub rescheduled_time: Option<NaiveTime>,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_user_id: Option<Uuid>,
    pub service_id: Uuid,
    pub service_name: String,
    pub price_cents: i32,
    pub branch_id: Uuid,
    pub branch_name: String,
    pub branch_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const APPOINTMENT_VIEW_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.appointment_ticket,
      a.appointment_date,
      a.booking_type,
      a.status,
      st.name AS status_name,
      a.time_slot_id,
      ts.slot_time,
      a.rescheduled_date,
      a.rescheduled_time_slot_id,
      rts.slot_time AS rescheduled_time,
      p.patient_id,
      p.name  AS patient_name,
      p.email AS patient_email,
      p.user_id AS patient_user_id,
      s.service_id,
      s.name AS service_name,
      s.price_cents,
      b.branch_id,
      b.name AS branch_name,
      ad.address AS branch_address,
      a.created_at,
      a.updated_at
    FROM appointment a
    JOIN appointment_status st ON st.status_id = a.status
    JOIN time_slot ts ON ts.time_slot_id = a.time_slot_id
    LEFT JOIN time_slot rts ON rts.time_slot_id = a.rescheduled_time_slot_id
    JOIN patient p ON p.patient_id = a.patient_id
    JOIN services s ON s.service_id = a.service_id
    JOIN branch b ON b.branch_id = a.branch_id
    JOIN addresses ad ON ad.address_id = b.address_id
"#;

#[derive(Debug, Clone, Serialize)]
pub struct StatusRef {
    pub id: i16,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotRef {
    pub id: i16,
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchRef {
    pub id: Uuid,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRef {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RescheduleRequestView {
    pub date: NaiveDate,
    pub time_slot: Option<SlotRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    pub appointment_id: Uuid,
    pub appointment_ticket: String,
    pub date: NaiveDate,
    pub time_slot: SlotRef,
    pub status: StatusRef,
    pub booking_type: String,
    pub patient: NamedRef,
    pub service: ServiceRef,
    pub branch: BranchRef,
    pub reschedule_request: Option<RescheduleRequestView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub patient_email: String,
    #[serde(skip)]
    pub patient_user_id: Option<Uuid>,
}

impl AppointmentView {
    pub fn status(&self) -> Option<AppointmentStatus> {
        AppointmentStatus::from_i16(self.status.id)
    }

    /// One-line description used in notifications.
    pub fn summary(&self) -> String {
        format!(
            "{} at {} on {} {}",
            self.service.name,
            self.branch.name,
            self.date.format("%Y-%m-%d"),
            self.time_slot.time.format("%H:%M"),
        )
    }
}

impl From<AppointmentViewRow> for AppointmentView {
    fn from(r: AppointmentViewRow) -> Self {
        let reschedule_request = r.rescheduled_date.map(|date| RescheduleRequestView {
            date,
            time_slot: r
                .rescheduled_time_slot_id
                .zip(r.rescheduled_time)
                .map(|(id, time)| SlotRef { id, time }),
        });
        AppointmentView {
            appointment_id: r.appointment_id,
            appointment_ticket: r.appointment_ticket,
            date: r.appointment_date,
            time_slot: SlotRef {
                id: r.time_slot_id,
                time: r.slot_time,
            },
            status: StatusRef {
                id: r.status,
                name: r.status_name,
            },
            booking_type: r.booking_type,
            patient: NamedRef {
                id: r.patient_id,
                name: r.patient_name,
            },
            service: ServiceRef {
                id: r.service_id,
                name: r.service_name,
                price_cents: r.price_cents,
            },
            branch: BranchRef {
                id: r.branch_id,
                name: r.branch_name,
                address: r.branch_address,
            },
            reschedule_request,
            created_at: r.created_at,
            updated_at: r.updated_at,
            patient_email: r.patient_email,
            patient_user_id: r.patient_user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> AppointmentViewRow {
        let now = Utc::now();
        AppointmentViewRow {
            appointment_id: Uuid::new_v4(),
            appointment_ticket: "APT-ABCDEFGH".into(),
            appointment_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            booking_type: "online".into(),
            status: 6,
            status_name: "Rescheduled".into(),
            time_slot_id: 3,
            slot_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            rescheduled_date: NaiveDate::from_ymd_opt(2026, 10, 22),
            rescheduled_time_slot_id: Some(5),
            rescheduled_time: NaiveTime::from_hms_opt(12, 0, 0),
            patient_id: Uuid::new_v4(),
            patient_name: "Maria Santos".into(),
            patient_email: "maria@example.com".into(),
            patient_user_id: None,
            service_id: Uuid::new_v4(),
            service_name: "Cleaning".into(),
            price_cents: 150_000,
            branch_id: Uuid::new_v4(),
            branch_name: "Main Branch".into(),
            branch_address: "12 Rizal St".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn role_names_and_staff() {
        assert_eq!(role_to_string(ROLE_PATIENT), "patient");
        assert_eq!(role_to_string(ROLE_DENTIST), "dentist");
        assert_eq!(role_to_string(9), "unknown");
        assert!(!is_staff_role(ROLE_PATIENT));
        assert!(is_staff_role(ROLE_RECEPTIONIST));
        assert!(!can_manage_appointments(ROLE_DENTIST));
        assert!(can_manage_appointments(ROLE_MANAGER));
    }

    #[test]
    fn view_nests_joined_columns_and_hides_contact() {
        let view = AppointmentView::from(row());
        assert_eq!(view.status(), Some(AppointmentStatus::Rescheduled));
        assert_eq!(view.summary(), "Cleaning at Main Branch on 2026-10-20 10:00");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"]["name"], "Rescheduled");
        assert_eq!(json["time_slot"]["time"], "10:00:00");
        assert_eq!(json["reschedule_request"]["date"], "2026-10-22");
        assert_eq!(json["reschedule_request"]["time_slot"]["id"], 5);
        assert!(json.get("patient_email").is_none());
        assert!(json.get("patient_user_id").is_none());
    }

    #[test]
    fn view_without_reschedule_request() {
        let mut r = row();
        r.rescheduled_date = None;
        r.rescheduled_time_slot_id = None;
        r.rescheduled_time = None;
        let json = serde_json::to_value(AppointmentView::from(r)).unwrap();
        assert!(json["reschedule_request"].is_null());
    }
}
