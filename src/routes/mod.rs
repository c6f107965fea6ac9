use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod availability_routes;
pub mod branch_routes;
pub mod clinic_routes;
pub mod health_routes;
pub mod patient_routes;
pub mod portal_routes;
pub mod service_routes;
pub mod status_routes;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/auth", auth_routes::router())
        .nest("/services", service_routes::router())
        .merge(appointment_routes::router())
        .merge(availability_routes::router())
        .merge(branch_routes::router())
        .merge(status_routes::router())
        .merge(clinic_routes::router())
        .merge(portal_routes::router())
        .merge(patient_routes::router());

    Router::new()
        .nest("/api/v1", api)
        .merge(health_routes::router())
        .with_state(state)
}

#[cfg(test)]
mod db_tests;
