use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    pub fn db(e: sqlx::Error) -> Self {
        ApiError::Internal(format!("db error: {e}"))
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::to_error_response("INTERNAL", "Internal server error"),
                )
                    .into_response()
            }
        }
    }
}
