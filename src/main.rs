mod auth;
mod booking;
mod config;
mod db;
mod dental_chart;
mod error;
mod geo;
mod mailer;
mod matching;
mod middleware;
mod models;
mod routes;
mod scheduling;
mod status;
mod validation;

use crate::{config::Config, models::AppState};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    if cfg.mail.resend_api_key.is_none() {
        tracing::warn!("RESEND_API_KEY not set; appointment emails will only be logged");
    }

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        patient_session_ttl_hours: cfg.patient_session_ttl_hours,
        ticket_session_ttl_hours: cfg.ticket_session_ttl_hours,
        booking: cfg.booking,
        mailer: mailer::from_config(&cfg.mail),
        mail_from: cfg.mail.from_address.clone(),
    };

    tracing::info!(
        utc_offset_hours = cfg.booking.utc_offset_hours,
        booking_window_days = cfg.booking.booking_window_days,
        daily_capacity = cfg.booking.daily_capacity,
        slot_capacity = cfg.booking.slot_capacity,
        "booking rules loaded"
    );

    // The booking site is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
