// src/routes/clinic_routes.rs

use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    booking::load_clinic_contact,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, ROLE_ADMIN, ROLE_MANAGER},
    validation::is_valid_email,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/clinic", get(get_clinic).patch(update_clinic))
}

#[derive(Debug, Serialize)]
pub struct ClinicData {
    pub clinic_name: String,
    pub contact_email: Option<String>,
    pub facebook_url: Option<String>,
}

/// Absent leaves the column alone; explicit null clears it.
fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct UpdateClinicRequest {
    pub clinic_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact_email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub facebook_url: Option<Option<String>>,
}

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    if matches!(auth.role(), Some(ROLE_ADMIN | ROLE_MANAGER)) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can update clinic settings".into(),
        ))
    }
}

fn validate_update(req: &UpdateClinicRequest) -> Result<(), ApiError> {
    if let Some(name) = &req.clinic_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "clinic_name is required".into(),
            ));
        }
        if name.chars().count() > 128 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "clinic_name is too long (max 128)".into(),
            ));
        }
    }
    if let Some(Some(mail)) = &req.contact_email {
        if !is_valid_email(mail) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "contact_email is not a valid email address".into(),
            ));
        }
    }
    Ok(())
}

pub async fn get_clinic(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<ClinicData>>, ApiError> {
    let c = load_clinic_contact(&state).await?;
    Ok(Json(ApiOk {
        data: ClinicData {
            clinic_name: c.clinic_name,
            contact_email: c.contact_email,
            facebook_url: c.facebook_url,
        },
    }))
}

pub async fn update_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateClinicRequest>,
) -> Result<Json<ApiOk<ClinicData>>, ApiError> {
    ensure_admin_or_manager(&auth)?;
    validate_update(&req)?;

    let name = req.clinic_name.as_deref().map(str::trim);
    let contact_email = req.contact_email.clone().flatten().map(|s| s.trim().to_string());
    let facebook_url = req.facebook_url.clone().flatten().map(|s| s.trim().to_string());

    // Upsert the singleton; a missing row needs a name to be created.
    let row: (String, Option<String>, Option<String>) = sqlx::query_as(
        r#"
        INSERT INTO clinic_settings (singleton_id, clinic_name, contact_email, facebook_url)
        VALUES (TRUE, COALESCE($1, 'Clinic'), $3, $5)
        ON CONFLICT (singleton_id)
        DO UPDATE SET
          clinic_name   = COALESCE($1, clinic_settings.clinic_name),
          contact_email = CASE WHEN $2 THEN $3 ELSE clinic_settings.contact_email END,
          facebook_url  = CASE WHEN $4 THEN $5 ELSE clinic_settings.facebook_url END
        RETURNING clinic_name, contact_email, facebook_url
        "#,
    )
    .bind(name)
    .bind(req.contact_email.is_some())
    .bind(contact_email)
    .bind(req.facebook_url.is_some())
    .bind(facebook_url)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(user_id = ?auth.user_id(), "clinic settings updated");

    Ok(Json(ApiOk {
        data: ClinicData {
            clinic_name: row.0,
            contact_email: row.1,
            facebook_url: row.2,
        },
    }))
}
