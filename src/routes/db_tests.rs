// Router tests against a migrated Postgres (`DATABASE_URL` must point at a server
// sqlx can create scratch databases on).

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{Value, json};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use super::router;
use crate::{
    auth::hash_password, booking, config::DEFAULT_MAIL_FROM, error::ApiError, mailer::LogMailer,
    models::AppState, scheduling::BookingRules,
};

fn state_with(db: PgPool, booking: BookingRules) -> AppState {
    AppState {
        db,
        session_ttl_hours: 24,
        patient_session_ttl_hours: 72,
        ticket_session_ttl_hours: 24,
        booking,
        mailer: Arc::new(LogMailer),
        mail_from: DEFAULT_MAIL_FROM.to_string(),
    }
}

async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    req.body(Body::from(body.to_string())).unwrap()
}

fn tomorrow() -> NaiveDate {
    BookingRules::default().clinic_today(Utc::now()) + Duration::days(1)
}

struct Clinic {
    branch_id: Uuid,
    service_id: Uuid,
}

async fn seed_clinic(db: &PgPool) -> Clinic {
    let address_id: Uuid = sqlx::query_scalar(
        "INSERT INTO addresses (address, latitude, longitude) VALUES ('1127 Rizal Ave', 14.6, 121.0) RETURNING address_id",
    )
    .fetch_one(db)
    .await
    .unwrap();
    let branch_id: Uuid = sqlx::query_scalar(
        "INSERT INTO branch (name, address_id) VALUES ('Main Branch', $1) RETURNING branch_id",
    )
    .bind(address_id)
    .fetch_one(db)
    .await
    .unwrap();
    let service_id: Uuid = sqlx::query_scalar(
        "INSERT INTO services (name, price_cents) VALUES ('Cleaning', 80000) RETURNING service_id",
    )
    .fetch_one(db)
    .await
    .unwrap();
    Clinic { branch_id, service_id }
}

/// Patient `n` differs from every other `n` in name, email, phone and dob.
fn patient(n: u32) -> Value {
    json!({
        "name": format!("Patient Number{n}"),
        "phone_number": format!("9171234{n:02}"),
        "email": format!("patient{n}@example.com"),
        "address": { "address": "12 Rizal St", "latitude": 14.6, "longitude": 121.0 },
        "sex": "female",
        "dob": format!("1990-05-{:02}", n + 1)
    })
}

fn booking_body(n: u32, clinic: &Clinic, date: NaiveDate, slot: i16) -> Value {
    let mut body = patient(n);
    body["branch_id"] = json!(clinic.branch_id);
    body["service_id"] = json!(clinic.service_id);
    body["date"] = json!(date);
    body["time_slot_id"] = json!(slot);
    body
}

async fn book(state: &AppState, body: Value) -> (StatusCode, Value) {
    send(state, post_json("/api/v1/appointments/book", None, body)).await
}

async fn admin_token(state: &AppState) -> String {
    let hash = hash_password("Admin1234").unwrap();
    sqlx::query(
        "INSERT INTO app_user (email, display_name, password_hash, roles) VALUES ('admin@clinic.test', 'Admin', $1, 1)",
    )
    .bind(hash)
    .execute(&state.db)
    .await
    .unwrap();

    let (status, body) = send(
        state,
        post_json(
            "/api/v1/auth/login",
            None,
            json!({ "email": "admin@clinic.test", "password": "Admin1234" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["access_token"].as_str().unwrap().to_string()
}

async fn ticket_token(state: &AppState, ticket: &str, email: &str) -> (StatusCode, Value) {
    send(
        state,
        post_json(
            "/api/v1/auth/ticket/login",
            None,
            json!({ "ticket": ticket, "email": email }),
        ),
    )
    .await
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_bookings_for_one_slot_admit_exactly_one(db: PgPool) {
    let clinic = seed_clinic(&db).await;
    let state = state_with(db, BookingRules::default());
    let date = tomorrow();

    let handles: Vec<_> = (0..5)
        .map(|n| {
            let state = state.clone();
            let body = booking_body(n, &clinic, date, 3);
            tokio::spawn(async move { book(&state, body).await })
        })
        .collect();

    let mut ok = 0;
    let mut taken = 0;
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        match status {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => {
                assert_eq!(body["error"]["code"], "SLOT_TAKEN");
                taken += 1;
            }
            other => panic!("unexpected {other}: {body}"),
        }
    }
    assert_eq!((ok, taken), (1, 4));
}

#[sqlx::test(migrations = "./migrations")]
async fn a_patient_books_once_per_day(db: PgPool) {
    let clinic = seed_clinic(&db).await;
    let state = state_with(db, BookingRules::default());
    let date = tomorrow();

    let (status, first) = book(&state, booking_body(1, &clinic, date, 3)).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["data"]["status"]["id"], 2);

    let (status, second) = book(&state, booking_body(1, &clinic, date, 5)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(second["error"]["code"], "PATIENT_DAY_TAKEN");

    let (status, _) = book(&state, booking_body(1, &clinic, date + Duration::days(1), 5)).await;
    assert_eq!(status, StatusCode::OK);
}

#[sqlx::test(migrations = "./migrations")]
async fn daily_capacity_closes_the_day(db: PgPool) {
    let clinic = seed_clinic(&db).await;
    let rules = BookingRules {
        daily_capacity: 2,
        ..BookingRules::default()
    };
    let state = state_with(db, rules);
    let date = tomorrow();

    for (n, slot) in [(1, 3), (2, 4)] {
        let (status, body) = book(&state, booking_body(n, &clinic, date, slot)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, body) = book(&state, booking_body(3, &clinic, date, 5)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DAY_FULLY_BOOKED");
}

#[sqlx::test(migrations = "./migrations")]
async fn reschedule_holds_the_old_slot_until_staff_accept(db: PgPool) {
    let clinic = seed_clinic(&db).await;
    let state = state_with(db, BookingRules::default());
    let date = tomorrow();
    let moved_to = date + Duration::days(1);

    let (_, booked) = book(&state, booking_body(1, &clinic, date, 3)).await;
    let appointment_id = booked["data"]["appointment_id"].as_str().unwrap().to_string();
    let ticket = booked["data"]["appointment_ticket"].as_str().unwrap().to_string();

    let (status, login) = ticket_token(&state, &ticket, "Patient1@Example.com").await;
    assert_eq!(status, StatusCode::OK, "{login}");
    let token = login["data"]["access_token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &state,
        post_json(
            &format!("/api/v1/appointments/{appointment_id}/reschedule"),
            Some(&token),
            json!({ "date": moved_to, "time_slot_id": 4 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"]["id"], 6);
    assert_eq!(body["data"]["date"], json!(date));
    assert_eq!(body["data"]["reschedule_request"]["date"], json!(moved_to));

    // the original slot stays occupied while the request is open
    let (status, body) = book(&state, booking_body(2, &clinic, date, 3)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SLOT_TAKEN");

    let admin = admin_token(&state).await;
    let (status, body) = send(
        &state,
        post_json(
            &format!("/api/v1/appointments/{appointment_id}/status"),
            Some(&admin),
            json!({ "status": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"]["id"], 1);
    assert_eq!(body["data"]["date"], json!(moved_to));
    assert_eq!(body["data"]["time_slot"]["id"], 4);
    assert!(body["data"]["reschedule_request"].is_null());

    let (status, body) = book(&state, booking_body(2, &clinic, date, 3)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[sqlx::test(migrations = "./migrations")]
async fn accepting_never_drops_a_reschedule_that_lands_mid_request(db: PgPool) {
    let clinic = seed_clinic(&db).await;
    let state = state_with(db.clone(), BookingRules::default());
    let date = tomorrow();
    let moved_to = date + Duration::days(1);

    let (_, booked) = book(&state, booking_body(1, &clinic, date, 3)).await;
    let appointment_id: Uuid = booked["data"]["appointment_id"].as_str().unwrap().parse().unwrap();
    let admin = admin_token(&state).await;

    // A patient's reschedule holds the row while staff accept the appointment.
    let mut patient_tx = db.begin().await.unwrap();
    sqlx::query("SELECT 1 FROM appointment WHERE appointment_id = $1 FOR UPDATE")
        .bind(appointment_id)
        .execute(&mut *patient_tx)
        .await
        .unwrap();
    sqlx::query(
        "UPDATE appointment SET status = 6, rescheduled_date = $2, rescheduled_time_slot_id = 4 WHERE appointment_id = $1",
    )
    .bind(appointment_id)
    .bind(moved_to)
    .execute(&mut *patient_tx)
    .await
    .unwrap();

    let accept = {
        let state = state.clone();
        tokio::spawn(async move {
            send(
                &state,
                post_json(
                    &format!("/api/v1/appointments/{appointment_id}/status"),
                    Some(&admin),
                    json!({ "status": 1 }),
                ),
            )
            .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    patient_tx.commit().await.unwrap();

    let (status, body) = accept.await.unwrap();
    let (row_status, row_date, pending): (i16, NaiveDate, Option<NaiveDate>) = sqlx::query_as(
        "SELECT status, appointment_date, rescheduled_date FROM appointment WHERE appointment_id = $1",
    )
    .bind(appointment_id)
    .fetch_one(&db)
    .await
    .unwrap();

    match status {
        StatusCode::CONFLICT => {
            assert_eq!(body["error"]["code"], "APPOINTMENT_CHANGED");
            assert_eq!((row_status, row_date, pending), (6, date, Some(moved_to)));
        }
        StatusCode::OK => assert_eq!((row_status, row_date, pending), (1, moved_to, None)),
        other => panic!("unexpected {other}: {body}"),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn ticket_login_needs_the_booking_email(db: PgPool) {
    let clinic = seed_clinic(&db).await;
    let state = state_with(db, BookingRules::default());

    let (_, booked) = book(&state, booking_body(1, &clinic, tomorrow(), 3)).await;
    let ticket = booked["data"]["appointment_ticket"].as_str().unwrap().to_string();

    let (status, body) = ticket_token(&state, &ticket, "someone.else@example.com").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TICKET");

    let (status, body) = ticket_token(&state, &ticket.to_lowercase(), "patient1@example.com").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["appointment_id"], booked["data"]["appointment_id"]);
}

fn registration(n: u32, email: &str) -> Value {
    let mut body = patient(n);
    body["email"] = json!(email);
    body["password"] = json!("Secret123");
    body["confirm_password"] = json!("Secret123");
    body
}

#[sqlx::test(migrations = "./migrations")]
async fn register_refuses_a_patient_already_linked(db: PgPool) {
    let state = state_with(db, BookingRules::default());

    let (status, body) = send(
        &state,
        post_json("/api/v1/auth/register", None, registration(1, "first@example.com")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // same name, dob and phone: the matcher resolves to the linked record
    let (status, body) = send(
        &state,
        post_json("/api/v1/auth/register", None, registration(1, "second@example.com")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PATIENT_ALREADY_LINKED");

    let accounts: i64 = sqlx::query_scalar("SELECT count(*) FROM app_user")
        .fetch_one(&state.db)
        .await
        .unwrap();
    assert_eq!(accounts, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn register_refuses_emails_held_by_disabled_accounts(db: PgPool) {
    let state = state_with(db, BookingRules::default());
    sqlx::query(
        "INSERT INTO app_user (email, display_name, password_hash, roles, is_active) VALUES ('gone@example.com', 'Gone', 'x', 0, false)",
    )
    .execute(&state.db)
    .await
    .unwrap();

    let (status, body) = send(
        &state,
        post_json("/api/v1/auth/register", None, registration(1, "Gone@Example.com")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "USER_EXISTS");
}

#[sqlx::test(migrations = "./migrations")]
async fn duplicate_ticket_is_a_conflict(db: PgPool) {
    let clinic = seed_clinic(&db).await;
    let patient_id: Uuid = sqlx::query_scalar(
        "INSERT INTO patient (name, dob, email, phone_number, sex) VALUES ('Maria Santos', '1990-05-01', 'maria@example.com', '917123456', 'female') RETURNING patient_id",
    )
    .fetch_one(&db)
    .await
    .unwrap();

    let insert = |slot: i16| {
        sqlx::query(
            "INSERT INTO appointment (appointment_ticket, patient_id, service_id, branch_id, appointment_date, time_slot_id, status) VALUES ('APT-SAME0001', $1, $2, $3, $4, $5, 2)",
        )
        .bind(patient_id)
        .bind(clinic.service_id)
        .bind(clinic.branch_id)
        .bind(tomorrow())
        .bind(slot)
    };

    insert(3).execute(&db).await.unwrap();
    let err = insert(4).execute(&db).await.unwrap_err();
    match booking::appointment_write_error(err) {
        ApiError::Conflict(code, _) => assert_eq!(code, "TICKET_TAKEN"),
        other => panic!("unexpected {other:?}"),
    }
}
