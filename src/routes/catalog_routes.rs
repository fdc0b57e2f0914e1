// src/routes/catalog_routes.rs
//
// Static reference data for the booking UI. Rooms and reasons are seeded by
// migration and never mutated by the API.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{error::ApiError, models::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(list_rooms))
        .route("/reasons", get(list_reasons))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RoomRow {
    pub room_id: i16,
    pub display_name: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReasonRow {
    pub reason_id: i16,
    pub description: String,
}

pub async fn list_rooms(
    State(state): State<AppState>,
) -> Result<Json<Vec<RoomRow>>, ApiError> {
    let rows: Vec<RoomRow> = sqlx::query_as(
        r#"
        SELECT room_id, display_name
        FROM room
        ORDER BY room_id ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn list_reasons(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReasonRow>>, ApiError> {
    let rows: Vec<ReasonRow> = sqlx::query_as(
        r#"
        SELECT reason_id, description
        FROM visit_reason
        WHERE is_active = true
        ORDER BY reason_id ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}
