mod auth;
mod booking;
mod config;
mod middleware;
mod schedule;

mod db;
mod error;
mod models;
mod routes;

use std::sync::Arc;

use crate::{config::Config, models::AppState, schedule::ClinicSchedule};

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
    let pool = db::connect_pg(&cfg.database_url, cfg.max_db_connections).await?;

    let schedule = ClinicSchedule::clinic_default();
    tracing::info!(
        rooms = schedule.room_count(),
        slots_per_day = schedule.visit_times().len(),
        "clinic schedule loaded"
    );

    let state = AppState {
        db: pool,
        schedule: Arc::new(schedule),
        session_ttl_hours: cfg.session_ttl_hours,
    };

    // The patient-facing booking page is served as static files elsewhere;
    // allow it to call the API cross-origin (OPTIONS preflight included).
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
