use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::schedule::ClinicSchedule;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub schedule: Arc<ClinicSchedule>,
    pub session_ttl_hours: i64,
}

/* -------------------------
   Status enumerations
--------------------------*/

/// Stored as smallint. The label set is closed; anything else coming in
/// over the API is a validation error, never written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum AppointmentStatus {
    Scheduled = 0,
    Cancelled = 1,
    Modified = 2,
}

impl AppointmentStatus {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Scheduled" => Some(Self::Scheduled),
            "Cancelled" => Some(Self::Cancelled),
            "Modified" => Some(Self::Modified),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Cancelled => "Cancelled",
            Self::Modified => "Modified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum SeriesStatus {
    Active = 0,
    Cancelled = 1,
}

/// Per-occurrence status, independent of the linked appointment's own
/// status; lets one visit be edited or dropped without touching the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum OccurrenceStatus {
    Scheduled = 0,
    Modified = 1,
    Cancelled = 2,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub staff_user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub staff_user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

/// An appointment joined with its patient and reference data; the shape
/// every appointment-returning endpoint responds with.
#[derive(Debug, Serialize, FromRow)]
pub struct AppointmentDetailRow {
    pub appointment_id: Uuid,
    pub visit_date: NaiveDate,
    pub visit_time: NaiveTime,
    pub status: AppointmentStatus,
    pub reason: String,
    pub room: String,
    pub patient_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age: i16,
    pub phone: String,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age: i16,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub visit_date: NaiveDate,
    pub visit_time: NaiveTime,
    pub patient_id: Uuid,
    pub reason_id: i16,
    pub room_id: i16,
    pub assigned_user_id: Option<Uuid>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SeriesRow {
    pub series_id: Uuid,
    pub origin_appointment_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub day_of_week: i16,
    pub visit_time: NaiveTime,
    pub status: SeriesStatus,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OccurrenceRow {
    pub occurrence_id: Uuid,
    pub series_id: Uuid,
    pub appointment_id: Uuid,
    pub programmed_date: NaiveDate,
    pub status: OccurrenceStatus,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping: 1 Administrator, 2 Coordinator, 3 Student (shared account).
pub fn role_to_string(role: i16) -> String {
    match role {
        1 => "administrator",
        2 => "coordinator",
        3 => "student",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_form_a_closed_set() {
        assert_eq!(
            AppointmentStatus::from_label("Scheduled"),
            Some(AppointmentStatus::Scheduled)
        );
        assert_eq!(
            AppointmentStatus::from_label("Cancelled"),
            Some(AppointmentStatus::Cancelled)
        );
        assert_eq!(
            AppointmentStatus::from_label("Modified"),
            Some(AppointmentStatus::Modified)
        );
        assert_eq!(AppointmentStatus::from_label("Done"), None);
        assert_eq!(AppointmentStatus::from_label("scheduled"), None);
    }

    #[test]
    fn status_label_round_trips() {
        for s in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Modified,
        ] {
            assert_eq!(AppointmentStatus::from_label(s.label()), Some(s));
        }
    }
}
