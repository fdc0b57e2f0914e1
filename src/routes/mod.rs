use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod catalog_routes;
pub mod patient_routes;
pub mod series_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/catalog", catalog_routes::router())
        .nest("/api/v1", patient_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", series_routes::router())
        .with_state(state)
}
