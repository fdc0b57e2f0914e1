// src/routes/patient_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, PatientRow},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients/search", post(search_patient))
        .route(
            "/patients/{patient_id}",
            get(get_patient).patch(update_patient),
        )
}

/* ============================================================
   POST /patients/search   (public, read-only)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SearchPatientRequest {
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct SearchPatientResponse {
    pub data: SearchPatientData,
}

#[derive(Debug, Serialize)]
pub struct SearchPatientData {
    pub patient: Option<PatientRow>,
    /// true when no patient carries this phone; the booking form then asks
    /// for the new-patient fields.
    pub is_new: bool,
}

pub async fn search_patient(
    State(state): State<AppState>,
    Json(req): Json<SearchPatientRequest>,
) -> Result<Json<SearchPatientResponse>, ApiError> {
    let phone = req.phone.trim();
    if phone.is_empty() {
        return Err(ApiError::validation("phone is required"));
    }

    let patient: Option<PatientRow> = sqlx::query_as(
        r#"
        SELECT patient_id, first_name, last_name, age, phone, created_at
        FROM patient
        WHERE phone = $1
        "#,
    )
    .bind(phone)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let is_new = patient.is_none();
    Ok(Json(SearchPatientResponse {
        data: SearchPatientData { patient, is_new },
    }))
}

/* ============================================================
   GET /patients/{id}   (any staff)
   ============================================================ */

pub async fn get_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<PatientRow>, ApiError> {
    let row: PatientRow = sqlx::query_as(
        r#"
        SELECT patient_id, first_name, last_name, age, phone, created_at
        FROM patient
        WHERE patient_id = $1
        "#,
    )
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::not_found("patient"))?;

    Ok(Json(row))
}

/* ============================================================
   PATCH /patients/{id}   (admin/coordinator explicit edit)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i16>,
    pub phone: Option<String>,
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    super::appointment_routes::ensure_manage(&auth)?;

    let existing: PatientRow = sqlx::query_as(
        r#"
        SELECT patient_id, first_name, last_name, age, phone, created_at
        FROM patient
        WHERE patient_id = $1
        "#,
    )
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::not_found("patient"))?;

    let first_name = match req.first_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.first_name.clone(),
    };
    let last_name = match req.last_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.last_name.clone(),
    };
    let phone = match req.phone.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.phone.clone(),
    };
    let age = req.age.unwrap_or(existing.age);
    if !(0..=130).contains(&age) {
        return Err(ApiError::validation("age must be between 0 and 130"));
    }

    let updated: PatientRow = sqlx::query_as(
        r#"
        UPDATE patient
        SET first_name = $2,
            last_name = $3,
            age = $4,
            phone = $5
        WHERE patient_id = $1
        RETURNING patient_id, first_name, last_name, age, phone, created_at
        "#,
    )
    .bind(patient_id)
    .bind(first_name)
    .bind(last_name)
    .bind(age)
    .bind(&phone)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        // phone is the patient's identity key
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::duplicate_patient(&phone)
        }
        _ => ApiError::Internal(format!("db error: {e}")),
    })?;

    Ok(Json(updated))
}
