use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, normalize_ticket, verify_password},
    booking,
    db::is_unique_violation,
    error::ApiError,
    middleware::auth_context::{AuthContext, Principal},
    models::*,
    validation::{PatientDetailsInput, validate_password_pair, validate_patient_details},
};

// session_token.session_type
const SESSION_TYPE_STAFF_PORTAL: i16 = 1;
const SESSION_TYPE_PATIENT_WEB: i16 = 2;
const SESSION_TYPE_TICKET: i16 = 4;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/patient/login", post(patient_login))
        .route("/ticket/login", post(ticket_login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/change_password", post(change_password))
}

/* -------------------------
   DTOs local to auth
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(flatten)]
    pub patient: PatientDetailsInput,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterData {
    pub user: UserProfile,
    pub patient_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeData {
    User {
        user: UserProfile,
        clinic: ClinicProfile,
        session: SessionInfo,
    },
    Ticket {
        appointment: AppointmentView,
        clinic: ClinicProfile,
        session: SessionInfo,
    },
}

/// Which login door the caller came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Portal {
    Staff,
    Patient,
}

impl Portal {
    fn session_type(self) -> i16 {
        match self {
            Portal::Staff => SESSION_TYPE_STAFF_PORTAL,
            Portal::Patient => SESSION_TYPE_PATIENT_WEB,
        }
    }

    fn admits(self, role: i16) -> Result<(), ApiError> {
        match self {
            Portal::Staff if is_staff_role(role) => Ok(()),
            Portal::Patient if role == ROLE_PATIENT => Ok(()),
            Portal::Staff => Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Access denied. This portal is for staff only.".into(),
            )),
            Portal::Patient => Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Access denied. This portal is for patients only.".into(),
            )),
        }
    }
}

fn user_profile(u: &UserRow) -> UserProfile {
    UserProfile {
        user_id: u.user_id,
        email: u.email.clone(),
        display_name: u.display_name.clone(),
        roles: vec![role_to_string(u.roles)],
    }
}

async fn load_clinic_name(state: &AppState) -> Result<String, ApiError> {
    let clinic_name: Option<String> = sqlx::query_scalar(
        r#"
        SELECT clinic_name
        FROM clinic_settings
        WHERE singleton_id = TRUE
        "#,
    )
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(clinic_name.unwrap_or_else(|| "Clinic".to_string()))
}

/* -------------------------
   Register
--------------------------*/

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiOk<RegisterData>>, ApiError> {
    let today = state.booking.clinic_today(Utc::now());
    let details = validate_patient_details(&req.patient, today)?;
    validate_password_pair(&req.password, &req.confirm_password)?;

    let password_hash = hash_password(&req.password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1 FROM app_user WHERE lower(email) = $1
        )
        "#,
    )
    .bind(&details.email)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let user_exists = || {
        ApiError::Conflict(
            "USER_EXISTS",
            "An account with this email already exists".into(),
        )
    };
    if exists {
        return Err(user_exists());
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO app_user (email, display_name, password_hash, roles)
        VALUES ($1, $2, $3, $4)
        RETURNING user_id, email, display_name, password_hash, roles, is_active
        "#,
    )
    .bind(&details.email)
    .bind(&details.name)
    .bind(&password_hash)
    .bind(ROLE_PATIENT)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| if is_unique_violation(&e) { user_exists() } else { ApiError::db(e) })?;

    let (patient_id, linked_user) = booking::find_or_create_patient(&mut *tx, &details).await?;
    if linked_user.is_some() {
        return Err(ApiError::Conflict(
            "PATIENT_ALREADY_LINKED",
            "This patient record already belongs to another account".into(),
        ));
    }

    sqlx::query(
        r#"
        UPDATE patient
        SET user_id = $1,
            updated_at = now()
        WHERE patient_id = $2
        "#,
    )
    .bind(user.user_id)
    .bind(patient_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(user_id = %user.user_id, %patient_id, "patient account registered");

    Ok(Json(ApiOk {
        data: RegisterData {
            user: user_profile(&user),
            patient_id,
        },
    }))
}

/* -------------------------
   Login
--------------------------*/

async fn login_with_portal(
    state: &AppState,
    req: &LoginRequest,
    portal: Portal,
) -> Result<LoginResponseData, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "email and password are required".into(),
        ));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, email, display_name, password_hash, roles, is_active
        FROM app_user
        WHERE lower(email) = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }
    portal.admits(user.roles)?;

    let clinic_name = load_clinic_name(state).await?;

    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let ttl_hours = match portal {
        Portal::Staff => state.session_ttl_hours,
        Portal::Patient => state.patient_session_ttl_hours,
    };
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token
            (user_id, session_token_hash, session_type, device_name, expires_at)
        VALUES
            ($1, $2, $3, $4, $5)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user.user_id)
    .bind(&token_hash)
    .bind(portal.session_type())
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(user_id = %user.user_id, session_token_id = %session.session_token_id, "login");

    Ok(LoginResponseData {
        access_token,
        expires_at: session.expires_at,
        user: user_profile(&user),
        clinic: ClinicProfile { clinic_name },
    })
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginResponseData>>, ApiError> {
    let data = login_with_portal(&state, &req, Portal::Staff).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn patient_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginResponseData>>, ApiError> {
    let data = login_with_portal(&state, &req, Portal::Patient).await?;
    Ok(Json(ApiOk { data }))
}

/// Appointment-scoped session for patients without an account.
pub async fn ticket_login(
    State(state): State<AppState>,
    Json(req): Json<TicketLoginRequest>,
) -> Result<Json<ApiOk<TicketLoginData>>, ApiError> {
    let ticket = normalize_ticket(&req.ticket);
    let email = req.email.trim().to_lowercase();
    if ticket.is_empty() || email.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "ticket and email are required".into(),
        ));
    }

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        SELECT a.appointment_id
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        WHERE a.appointment_ticket = $1
          AND lower(p.email) = $2
          AND a.deleted_at IS NULL
        "#,
    )
    .bind(&ticket)
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| {
        ApiError::Unauthorized("INVALID_TICKET", "Invalid appointment ticket or email".into())
    })?;

    let access_token = generate_access_token();
    let expires_at = Utc::now() + Duration::hours(state.ticket_session_ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token
            (appointment_id, session_token_hash, session_type, expires_at)
        VALUES
            ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(appointment_id)
    .bind(hash_access_token(&access_token))
    .bind(SESSION_TYPE_TICKET)
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%appointment_id, "ticket login");

    Ok(Json(ApiOk {
        data: TicketLoginData {
            access_token,
            expires_at: session.expires_at,
            appointment_id,
        },
    }))
}

/* -------------------------
   Session
--------------------------*/

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let session = SessionInfo {
        session_token_id: session.session_token_id,
        expires_at: session.expires_at,
    };
    let clinic = ClinicProfile {
        clinic_name: load_clinic_name(&state).await?,
    };

    let data = match auth.principal {
        Principal::User { user_id, .. } => {
            let user: UserRow = sqlx::query_as::<_, UserRow>(
                r#"
                SELECT user_id, email, display_name, password_hash, roles, is_active
                FROM app_user
                WHERE user_id = $1
                  AND is_active = true
                "#,
            )
            .bind(user_id)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            MeData::User {
                user: user_profile(&user),
                clinic,
                session,
            }
        }
        Principal::Ticket { appointment_id } => {
            let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
            MeData::Ticket {
                appointment: booking::load_view(&mut *conn, appointment_id).await?,
                clinic,
                session,
            }
        }
    };

    Ok(Json(ApiOk { data }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(ApiOk {
        data: OkData { ok: true },
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let user_id = auth.user_id().ok_or_else(|| {
        ApiError::Forbidden(
            "FORBIDDEN",
            "Ticket sessions cannot change passwords".into(),
        )
    })?;

    validate_password_pair(&req.new_password, &req.confirm_password)?;

    let stored_hash: String = sqlx::query_scalar(
        r#"
        SELECT password_hash
        FROM app_user
        WHERE user_id = $1
          AND is_active = true
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.old_password, &stored_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE app_user
        SET password_hash = $1
        WHERE user_id = $2
        "#,
    )
    .bind(new_hash)
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    // keep the current session, drop the rest
    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, "password changed");

    Ok(Json(ApiOk {
        data: OkData { ok: true },
    }))
}
