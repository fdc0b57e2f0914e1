// src/routes/appointment_routes.rs

use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    booking::{self, NewAppointment, PatientInput},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppointmentDetailRow, AppointmentRow, AppointmentStatus, AppState},
    schedule::ClinicSchedule,
};

/*
Roles (staff_user.role):
1 administrator
2 coordinator
3 student (shared account, read-only)
*/

fn is_administrator(auth: &AuthContext) -> bool {
    auth.role == 1
}
fn is_coordinator(auth: &AuthContext) -> bool {
    auth.role == 2
}

pub(crate) fn ensure_manage(auth: &AuthContext) -> Result<(), ApiError> {
    if is_administrator(auth) || is_coordinator(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only administrators and coordinators can manage the agenda".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments/availability", get(get_availability))
        .route("/appointments/report", get(weekly_report))
        .route("/appointments", post(book_appointment).get(list_appointments))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).patch(edit_appointment),
        )
        .route("/appointments/{appointment_id}/status", post(update_status))
}

/* ============================================================
   Response DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotAvailability {
    Available,
    Full,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityData {
    pub date: NaiveDate,
    pub closed: bool,
    /// time ("HH:MM:SS") -> Available | Full, in slot order
    pub slots: BTreeMap<String, SlotAvailability>,
}

/* ============================================================
   Shared helpers
   ============================================================ */

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date must be YYYY-MM-DD"))
}

pub(crate) fn parse_time(s: &str) -> Result<NaiveTime, ApiError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| ApiError::validation("time must be HH:MM or HH:MM:SS"))
}

/// One appointment joined with patient, reason and room names.
pub(crate) async fn load_detail(
    conn: &mut PgConnection,
    appointment_id: Uuid,
) -> Result<AppointmentDetailRow, ApiError> {
    sqlx::query_as::<_, AppointmentDetailRow>(
        r#"
        SELECT
          a.appointment_id,
          a.visit_date,
          a.visit_time,
          a.status,
          vr.description AS reason,
          rm.display_name AS room,
          p.patient_id,
          p.first_name,
          p.last_name,
          p.age,
          p.phone
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        JOIN visit_reason vr ON vr.reason_id = a.reason_id
        JOIN room rm ON rm.room_id = a.room_id
        WHERE a.appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::not_found("appointment"))
}

/// Pure mapping from taken-room counts to the per-time availability the
/// booking UI renders. Times absent from `counts` are fully free.
fn availability_slots(
    schedule: &ClinicSchedule,
    counts: &HashMap<NaiveTime, i64>,
) -> BTreeMap<String, SlotAvailability> {
    schedule
        .visit_times()
        .iter()
        .map(|time| {
            let taken = counts.get(time).copied().unwrap_or(0) as usize;
            let state = if schedule.is_slot_available(taken) {
                SlotAvailability::Available
            } else {
                SlotAvailability::Full
            };
            (time.format("%H:%M:%S").to_string(), state)
        })
        .collect()
}

/* ============================================================
   GET /appointments/availability   (public)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
}

pub async fn get_availability(
    State(state): State<AppState>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<ApiOk<AvailabilityData>>, ApiError> {
    let date = parse_date(&q.date)?;

    // Weekends: closed, regardless of what the table holds.
    if !state.schedule.is_bookable_day(date) {
        return Ok(Json(ApiOk {
            data: AvailabilityData {
                date,
                closed: true,
                slots: BTreeMap::new(),
            },
        }));
    }

    let rows: Vec<(NaiveTime, i64)> = sqlx::query_as(
        r#"
        SELECT visit_time, COUNT(*)
        FROM appointment
        WHERE visit_date = $1
          AND status <> $2
        GROUP BY visit_time
        "#,
    )
    .bind(date)
    .bind(AppointmentStatus::Cancelled)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let counts: HashMap<NaiveTime, i64> = rows.into_iter().collect();

    Ok(Json(ApiOk {
        data: AvailabilityData {
            date,
            closed: false,
            slots: availability_slots(&state.schedule, &counts),
        },
    }))
}

/* ============================================================
   POST /appointments   (public booking)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BookAppointmentRequest {
    /// Caller's claim; defaults to true like the booking form.
    pub is_new: Option<bool>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i16>,
    pub phone: String,
    pub date: String,
    pub time: String,
    pub reason_id: i16,
}

pub async fn book_appointment(
    State(state): State<AppState>,
    auth: Option<AuthContext>,
    Json(req): Json<BookAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDetailRow>>, ApiError> {
    let date = parse_date(&req.date)?;
    let time = parse_time(&req.time)?;
    state.schedule.check_slot(date, time)?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    booking::check_reason(&mut tx, req.reason_id).await?;

    let patient = booking::resolve_patient(
        &mut tx,
        &PatientInput {
            is_new: req.is_new.unwrap_or(true),
            phone: req.phone.clone(),
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            age: req.age,
        },
    )
    .await?;

    let assigned = booking::shared_student(&mut tx).await?;

    let appointment = booking::insert_first_fit(
        &mut tx,
        &state.schedule,
        date,
        time,
        &NewAppointment {
            patient_id: patient.patient_id,
            reason_id: req.reason_id,
            assigned_user_id: assigned,
            created_by_user_id: auth.map(|a| a.user_id),
        },
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tracing::info!(
        appointment_id = %appointment.appointment_id,
        %date,
        %time,
        room = appointment.room_id,
        "appointment booked"
    );

    let mut conn = state
        .db
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    let detail = load_detail(&mut conn, appointment.appointment_id).await?;
    Ok(Json(ApiOk { data: detail }))
}

/* ============================================================
   GET /appointments   (admin/coordinator, optional ?date=)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub date: Option<String>,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDetailRow>>>, ApiError> {
    ensure_manage(&auth)?;

    let filter = match q.date.as_deref() {
        Some(s) => Some(parse_date(s)?),
        None => None,
    };

    let rows: Vec<AppointmentDetailRow> = sqlx::query_as(
        r#"
        SELECT
          a.appointment_id,
          a.visit_date,
          a.visit_time,
          a.status,
          vr.description AS reason,
          rm.display_name AS room,
          p.patient_id,
          p.first_name,
          p.last_name,
          p.age,
          p.phone
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        JOIN visit_reason vr ON vr.reason_id = a.reason_id
        JOIN room rm ON rm.room_id = a.room_id
        WHERE ($1::date IS NULL OR a.visit_date = $1)
        ORDER BY a.visit_date ASC, a.visit_time ASC
        "#,
    )
    .bind(filter)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   GET /appointments/{id}   (any staff)
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetailRow>>, ApiError> {
    let mut conn = state
        .db
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    let detail = load_detail(&mut conn, appointment_id).await?;
    Ok(Json(ApiOk { data: detail }))
}

/* ============================================================
   POST /appointments/{id}/status
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiOk<AppointmentDetailRow>>, ApiError> {
    ensure_manage(&auth)?;

    let status = AppointmentStatus::from_label(req.status.trim()).ok_or_else(|| {
        ApiError::validation("status must be one of Scheduled, Cancelled, Modified")
    })?;

    let updated: Option<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE appointment
        SET status = $2, updated_at = now()
        WHERE appointment_id = $1
        RETURNING appointment_id
        "#,
    )
    .bind(appointment_id)
    .bind(status)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| match &e {
        // Un-cancelling can collide with a booking that took the room since.
        sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::Conflict(
            "SLOT_TAKEN",
            "another appointment now occupies this room at the slot".into(),
        ),
        _ => ApiError::Internal(format!("db error: {e}")),
    })?;

    if updated.is_none() {
        return Err(ApiError::not_found("appointment"));
    }

    let mut conn = state
        .db
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    let detail = load_detail(&mut conn, appointment_id).await?;
    Ok(Json(ApiOk { data: detail }))
}

/* ============================================================
   PATCH /appointments/{id}   (reschedule / edit)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct EditAppointmentRequest {
    pub date: Option<String>,
    pub time: Option<String>,
    pub reason_id: Option<i16>,
    pub status: Option<String>,
}

/// Apply an edit to one appointment inside the caller's transaction. A
/// date/time change re-runs room assignment at the new slot; the original's
/// unchecked reschedule is deliberately not reproduced.
pub(crate) async fn apply_edit(
    conn: &mut PgConnection,
    schedule: &ClinicSchedule,
    appointment_id: Uuid,
    req: &EditAppointmentRequest,
) -> Result<AppointmentRow, ApiError> {
    let existing: Option<AppointmentRow> = sqlx::query_as(
        r#"
        SELECT appointment_id, visit_date, visit_time, patient_id, reason_id,
               room_id, assigned_user_id, status
        FROM appointment
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let mut current = existing.ok_or_else(|| ApiError::not_found("appointment"))?;

    let new_date = match req.date.as_deref() {
        Some(s) => parse_date(s)?,
        None => current.visit_date,
    };
    let new_time = match req.time.as_deref() {
        Some(s) => parse_time(s)?,
        None => current.visit_time,
    };

    if new_date != current.visit_date || new_time != current.visit_time {
        current = booking::reassign_slot(&mut *conn, schedule, appointment_id, new_date, new_time)
            .await?;
    }

    if let Some(reason_id) = req.reason_id {
        booking::check_reason(&mut *conn, reason_id).await?;
        sqlx::query(
            r#"
            UPDATE appointment
            SET reason_id = $2, updated_at = now()
            WHERE appointment_id = $1
            "#,
        )
        .bind(appointment_id)
        .bind(reason_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        current.reason_id = reason_id;
    }

    if let Some(label) = req.status.as_deref() {
        let status = AppointmentStatus::from_label(label.trim()).ok_or_else(|| {
            ApiError::validation("status must be one of Scheduled, Cancelled, Modified")
        })?;
        sqlx::query(
            r#"
            UPDATE appointment
            SET status = $2, updated_at = now()
            WHERE appointment_id = $1
            "#,
        )
        .bind(appointment_id)
        .bind(status)
        .execute(&mut *conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::Conflict(
                "SLOT_TAKEN",
                "another appointment now occupies this room at the slot".into(),
            ),
            _ => ApiError::Internal(format!("db error: {e}")),
        })?;
        current.status = status;
    }

    Ok(current)
}

pub async fn edit_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<EditAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDetailRow>>, ApiError> {
    ensure_manage(&auth)?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    apply_edit(&mut tx, &state.schedule, appointment_id, &req).await?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let mut conn = state
        .db
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    let detail = load_detail(&mut conn, appointment_id).await?;
    Ok(Json(ApiOk { data: detail }))
}

/* ============================================================
   GET /appointments/report   (coming days, denormalized)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub days: Option<i64>,
}

pub async fn weekly_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ReportQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDetailRow>>>, ApiError> {
    ensure_manage(&auth)?;

    let days = q.days.unwrap_or(7);
    if !(1..=31).contains(&days) {
        return Err(ApiError::validation("days must be between 1 and 31"));
    }

    let start = Utc::now().date_naive();
    let end = start + chrono::Duration::days(days);

    let rows: Vec<AppointmentDetailRow> = sqlx::query_as(
        r#"
        SELECT
          a.appointment_id,
          a.visit_date,
          a.visit_time,
          a.status,
          vr.description AS reason,
          rm.display_name AS room,
          p.patient_id,
          p.first_name,
          p.last_name,
          p.age,
          p.phone
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        JOIN visit_reason vr ON vr.reason_id = a.reason_id
        JOIN room rm ON rm.room_id = a.room_id
        WHERE a.visit_date >= $1
          AND a.visit_date < $2
        ORDER BY a.visit_date ASC, a.visit_time ASC
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: rows }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn availability_marks_full_times_and_leaves_the_rest_available() {
        let schedule = ClinicSchedule::clinic_default();
        let mut counts = HashMap::new();
        counts.insert(time(12, 30), 6); // full
        counts.insert(time(13, 30), 3); // partly taken

        let slots = availability_slots(&schedule, &counts);

        assert_eq!(slots.len(), schedule.visit_times().len());
        assert_eq!(slots["12:30:00"], SlotAvailability::Full);
        assert_eq!(slots["13:30:00"], SlotAvailability::Available);
        assert_eq!(slots["14:30:00"], SlotAvailability::Available);
        assert_eq!(slots["15:30:00"], SlotAvailability::Available);
    }

    #[test]
    fn availability_keys_are_in_slot_order() {
        let schedule = ClinicSchedule::clinic_default();
        let slots = availability_slots(&schedule, &HashMap::new());
        let keys: Vec<&str> = slots.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["12:30:00", "13:30:00", "14:30:00", "15:30:00"]);
    }

    #[test]
    fn date_and_time_parsing_rejects_malformed_input() {
        assert!(parse_date("2025-06-02").is_ok());
        assert!(parse_date("06/02/2025").is_err());
        assert_eq!(parse_time("12:30:00").unwrap(), time(12, 30));
        assert_eq!(parse_time("12:30").unwrap(), time(12, 30));
        assert!(parse_time("half past twelve").is_err());
    }
}
