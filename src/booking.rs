// src/booking.rs
//
// Slot admission: the one write path that turns a free room into a persisted
// appointment. Every handler that creates or moves an appointment goes
// through here, so the (date, time, room) uniqueness invariant has a single
// owner.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{AppointmentRow, AppointmentStatus, PatientRow},
    schedule::ClinicSchedule,
};

/// Fields for an appointment about to be admitted; the room is chosen here,
/// not by the caller.
#[derive(Debug)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub reason_id: i16,
    pub assigned_user_id: Option<Uuid>,
    pub created_by_user_id: Option<Uuid>,
}

/// Patient half of a booking request. `is_new` is the caller's claim; a
/// mismatch with the phone lookup is surfaced, never papered over.
#[derive(Debug)]
pub struct PatientInput {
    pub is_new: bool,
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i16>,
}

/// Rooms holding a non-cancelled appointment at exactly this slot.
pub async fn occupied_rooms(
    conn: &mut PgConnection,
    date: NaiveDate,
    time: NaiveTime,
    exclude: Option<Uuid>,
) -> Result<HashSet<i16>, ApiError> {
    let rows: Vec<(i16,)> = sqlx::query_as(
        r#"
        SELECT room_id
        FROM appointment
        WHERE visit_date = $1
          AND visit_time = $2
          AND status <> $3
          AND ($4::uuid IS NULL OR appointment_id <> $4)
        "#,
    )
    .bind(date)
    .bind(time)
    .bind(AppointmentStatus::Cancelled)
    .bind(exclude)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(rows.into_iter().map(|(room_id,)| room_id).collect())
}

/// First-fit admission. Returns None when every room is taken.
///
/// The insert races against concurrent bookings through the partial unique
/// index on (visit_date, visit_time, room_id): if another transaction wins
/// the candidate room, ON CONFLICT leaves this insert unapplied and the
/// next free room is tried. The loop is bounded by the room count, since a
/// lost race only ever shrinks the free set.
pub async fn try_insert_first_fit(
    conn: &mut PgConnection,
    schedule: &ClinicSchedule,
    date: NaiveDate,
    time: NaiveTime,
    new: &NewAppointment,
) -> Result<Option<AppointmentRow>, ApiError> {
    schedule.check_slot(date, time)?;

    for _ in 0..=schedule.room_count() {
        let occupied = occupied_rooms(&mut *conn, date, time, None).await?;
        let Some(room) = schedule.first_fit(&occupied) else {
            return Ok(None);
        };

        let inserted: Option<AppointmentRow> = sqlx::query_as(
            r#"
            INSERT INTO appointment
                (visit_date, visit_time, patient_id, reason_id, room_id,
                 assigned_user_id, status, created_by_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (visit_date, visit_time, room_id) WHERE status <> 1 DO NOTHING
            RETURNING appointment_id, visit_date, visit_time, patient_id, reason_id,
                      room_id, assigned_user_id, status
            "#,
        )
        .bind(date)
        .bind(time)
        .bind(new.patient_id)
        .bind(new.reason_id)
        .bind(room.room_id)
        .bind(new.assigned_user_id)
        .bind(AppointmentStatus::Scheduled)
        .bind(new.created_by_user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

        if let Some(row) = inserted {
            return Ok(Some(row));
        }
        tracing::debug!(%date, %time, room = room.room_id, "lost room to a concurrent booking, retrying");
    }

    Ok(None)
}

/// Admission that treats a full slot as a conflict error.
pub async fn insert_first_fit(
    conn: &mut PgConnection,
    schedule: &ClinicSchedule,
    date: NaiveDate,
    time: NaiveTime,
    new: &NewAppointment,
) -> Result<AppointmentRow, ApiError> {
    try_insert_first_fit(conn, schedule, date, time, new)
        .await?
        .ok_or_else(|| ApiError::slot_full(date, time))
}

/// Move an existing appointment to a new slot, re-running room assignment
/// there. The appointment's current room is ignored at the new slot (it may
/// get the same id back, or a lower one). A unique-index violation from a
/// concurrent booking surfaces as SLOT_TAKEN and rolls the transaction back.
pub async fn reassign_slot(
    conn: &mut PgConnection,
    schedule: &ClinicSchedule,
    appointment_id: Uuid,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<AppointmentRow, ApiError> {
    schedule.check_slot(date, time)?;

    let occupied = occupied_rooms(&mut *conn, date, time, Some(appointment_id)).await?;
    let Some(room) = schedule.first_fit(&occupied) else {
        return Err(ApiError::slot_full(date, time));
    };

    let updated: Option<AppointmentRow> = sqlx::query_as(
        r#"
        UPDATE appointment
        SET visit_date = $2,
            visit_time = $3,
            room_id = $4,
            updated_at = now()
        WHERE appointment_id = $1
        RETURNING appointment_id, visit_date, visit_time, patient_id, reason_id,
                  room_id, assigned_user_id, status
        "#,
    )
    .bind(appointment_id)
    .bind(date)
    .bind(time)
    .bind(room.room_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::slot_taken(date, time),
        _ => ApiError::Internal(format!("db error: {e}")),
    })?;

    updated.ok_or_else(|| ApiError::not_found("appointment"))
}

/// Look up the patient by phone, creating one when the caller declared a
/// new patient and supplied the required fields.
pub async fn resolve_patient(
    conn: &mut PgConnection,
    input: &PatientInput,
) -> Result<PatientRow, ApiError> {
    let phone = input.phone.trim();
    if phone.is_empty() {
        return Err(ApiError::validation("phone is required"));
    }

    let existing: Option<PatientRow> = sqlx::query_as(
        r#"
        SELECT patient_id, first_name, last_name, age, phone, created_at
        FROM patient
        WHERE phone = $1
        "#,
    )
    .bind(phone)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if !input.is_new {
        return existing.ok_or_else(|| ApiError::not_found("patient"));
    }

    if existing.is_some() {
        return Err(ApiError::duplicate_patient(phone));
    }

    let first_name = input.first_name.as_deref().map(str::trim).unwrap_or("");
    let last_name = input.last_name.as_deref().map(str::trim).unwrap_or("");
    let Some(age) = input.age else {
        return Err(ApiError::validation(
            "first_name, last_name and age are required for a new patient",
        ));
    };
    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::validation(
            "first_name, last_name and age are required for a new patient",
        ));
    }
    if !(0..=130).contains(&age) {
        return Err(ApiError::validation("age must be between 0 and 130"));
    }

    let created: PatientRow = sqlx::query_as(
        r#"
        INSERT INTO patient (first_name, last_name, age, phone)
        VALUES ($1, $2, $3, $4)
        RETURNING patient_id, first_name, last_name, age, phone, created_at
        "#,
    )
    .bind(first_name)
    .bind(last_name)
    .bind(age)
    .bind(phone)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match &e {
        // Two requests creating the same patient at once.
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::duplicate_patient(phone)
        }
        _ => ApiError::Internal(format!("db error: {e}")),
    })?;

    Ok(created)
}

/// The shared student account new appointments are assigned to, when one
/// exists. Assignment is best-effort; a clinic without a student account
/// still books.
pub async fn shared_student(conn: &mut PgConnection) -> Result<Option<Uuid>, ApiError> {
    sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM staff_user
        WHERE role = 3
          AND is_active = true
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))
}

/// Confirm the reason exists and is active before booking under it.
pub async fn check_reason(conn: &mut PgConnection, reason_id: i16) -> Result<(), ApiError> {
    let known: Option<i16> = sqlx::query_scalar(
        r#"
        SELECT reason_id
        FROM visit_reason
        WHERE reason_id = $1
          AND is_active = true
        "#,
    )
    .bind(reason_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if known.is_none() {
        return Err(ApiError::validation(format!("unknown reason_id {reason_id}")));
    }
    Ok(())
}
