use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, ROLE_PATIENT, can_manage_appointments, is_staff_role};

/// Who a bearer token speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User { user_id: Uuid, role: i16 },
    /// Anonymous session opened with an appointment ticket + email.
    Ticket { appointment_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session_token_id: Uuid,
    pub principal: Principal,
}

impl AuthContext {
    pub fn user_id(&self) -> Option<Uuid> {
        match self.principal {
            Principal::User { user_id, .. } => Some(user_id),
            Principal::Ticket { .. } => None,
        }
    }

    pub fn role(&self) -> Option<i16> {
        match self.principal {
            Principal::User { role, .. } => Some(role),
            Principal::Ticket { .. } => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role().is_some_and(is_staff_role)
    }

    pub fn ensure_staff(&self) -> Result<(), ApiError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("FORBIDDEN", "Staff access required".into()))
        }
    }

    pub fn ensure_manage_appointments(&self) -> Result<(), ApiError> {
        if self.role().is_some_and(can_manage_appointments) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Only admin/manager/receptionist can manage appointments".into(),
            ))
        }
    }

    /// Patient account sessions only.
    pub fn patient_user_id(&self) -> Result<Uuid, ApiError> {
        match self.principal {
            Principal::User { user_id, role } if role == ROLE_PATIENT => Ok(user_id),
            _ => Err(ApiError::Forbidden(
                "FORBIDDEN",
                "This endpoint is for patient accounts only".into(),
            )),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Option<Uuid>,
    roles: Option<i16>,
    appointment_id: Option<Uuid>,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            // User sessions also need an active account; ticket sessions have no user.
            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.user_id, u.roles, st.appointment_id
                FROM session_token st
                LEFT JOIN app_user u ON u.user_id = st.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND (st.user_id IS NULL OR u.is_active = true)
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            // best-effort
            let _ = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await;

            let principal = match (row.user_id, row.roles, row.appointment_id) {
                (Some(user_id), Some(role), _) => Principal::User { user_id, role },
                (None, _, Some(appointment_id)) => Principal::Ticket { appointment_id },
                _ => return Err(ApiError::session_expired()),
            };

            Ok(AuthContext {
                session_token_id: row.session_token_id,
                principal,
            })
        }
    }
}
