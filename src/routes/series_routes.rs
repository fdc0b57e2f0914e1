// src/routes/series_routes.rs
//
// Vision-therapy recurring series: one booking fans out into up to twelve
// weekly follow-ups inside a single transaction. Fully booked weeks are
// skipped, never retried on another day.

use axum::{
    extract::{Path, State},
    routing::{patch, post},
    Json, Router,
};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    booking::{self, NewAppointment, PatientInput},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        AppointmentDetailRow, AppointmentStatus, AppState, OccurrenceRow, OccurrenceStatus,
        SeriesStatus,
    },
};

use super::appointment_routes::{
    apply_edit, ensure_manage, load_detail, parse_date, parse_time, ApiOk, EditAppointmentRequest,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments/recurring", post(book_recurring))
        .route("/series/{series_id}/cancel", post(cancel_series))
        .route(
            "/series/occurrences/{appointment_id}",
            patch(edit_occurrence),
        )
}

/* ============================================================
   POST /appointments/recurring   (public booking)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BookRecurringRequest {
    pub is_new: Option<bool>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i16>,
    pub phone: String,
    pub start_date: String,
    pub start_time: String,
    /// false books a single therapy visit with no series attached.
    pub recurring: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct RecurringBookingData {
    pub appointment: AppointmentDetailRow,
    pub series_id: Option<Uuid>,
    pub end_date: Option<NaiveDate>,
    /// Appointments actually created, the original included. Less than the
    /// maximum when weeks were skipped.
    pub total_created: i64,
}

pub async fn book_recurring(
    State(state): State<AppState>,
    auth: Option<AuthContext>,
    Json(req): Json<BookRecurringRequest>,
) -> Result<Json<ApiOk<RecurringBookingData>>, ApiError> {
    let start_date = parse_date(&req.start_date)?;
    let start_time = parse_time(&req.start_time)?;
    state.schedule.check_slot(start_date, start_time)?;

    let recurring = req.recurring.unwrap_or(true);
    let created_by = auth.map(|a| a.user_id);

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

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

    let new = NewAppointment {
        patient_id: patient.patient_id,
        reason_id: state.schedule.therapy_reason_id,
        assigned_user_id: assigned,
        created_by_user_id: created_by,
    };

    // Occurrence #0: the slot the patient actually picked. A full slot here
    // fails the whole request, unlike the follow-up weeks.
    let original =
        booking::insert_first_fit(&mut tx, &state.schedule, start_date, start_time, &new).await?;

    if !recurring {
        tx.commit()
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

        let mut conn = state
            .db
            .acquire()
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        let detail = load_detail(&mut conn, original.appointment_id).await?;
        return Ok(Json(ApiOk {
            data: RecurringBookingData {
                appointment: detail,
                series_id: None,
                end_date: None,
                total_created: 1,
            },
        }));
    }

    let end_date = state
        .schedule
        .series_end_date(start_date)
        .ok_or_else(|| ApiError::validation("start_date is out of range"))?;
    // Stored once at creation; follow-ups advance by whole weeks, so every
    // occurrence stays on this weekday without re-deriving it.
    let day_of_week = start_date.weekday().num_days_from_monday() as i16;

    let (series_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO recurring_series
            (origin_appointment_id, start_date, end_date, day_of_week,
             visit_time, status, created_by_user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING series_id
        "#,
    )
    .bind(original.appointment_id)
    .bind(start_date)
    .bind(end_date)
    .bind(day_of_week)
    .bind(start_time)
    .bind(SeriesStatus::Active)
    .bind(created_by)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    insert_occurrence(&mut tx, series_id, original.appointment_id, start_date).await?;
    let mut total_created: i64 = 1;

    for cursor in state.schedule.follow_up_dates(start_date, end_date) {
        let follow_up =
            booking::try_insert_first_fit(&mut tx, &state.schedule, cursor, start_time, &new)
                .await?;
        match follow_up {
            Some(appointment) => {
                insert_occurrence(&mut tx, series_id, appointment.appointment_id, cursor).await?;
                total_created += 1;
            }
            None => {
                tracing::info!(%series_id, %cursor, "week fully booked, skipping occurrence");
            }
        }
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tracing::info!(%series_id, total_created, %end_date, "recurring series created");

    let mut conn = state
        .db
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    let detail = load_detail(&mut conn, original.appointment_id).await?;

    Ok(Json(ApiOk {
        data: RecurringBookingData {
            appointment: detail,
            series_id: Some(series_id),
            end_date: Some(end_date),
            total_created,
        },
    }))
}

async fn insert_occurrence(
    conn: &mut sqlx::PgConnection,
    series_id: Uuid,
    appointment_id: Uuid,
    programmed_date: NaiveDate,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO series_occurrence (series_id, appointment_id, programmed_date, status)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(series_id)
    .bind(appointment_id)
    .bind(programmed_date)
    .bind(OccurrenceStatus::Scheduled)
    .execute(&mut *conn)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    Ok(())
}

/* ============================================================
   POST /series/{series_id}/cancel
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct CancelSeriesData {
    pub series_id: Uuid,
    /// Appointments whose status actually changed; past visits keep theirs.
    pub cancelled_count: i64,
}

pub async fn cancel_series(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(series_id): Path<Uuid>,
) -> Result<Json<ApiOk<CancelSeriesData>>, ApiError> {
    ensure_manage(&auth)?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let known: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT series_id
        FROM recurring_series
        WHERE series_id = $1
        "#,
    )
    .bind(series_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if known.is_none() {
        return Err(ApiError::not_found("series"));
    }

    let today = Utc::now().date_naive();

    // Future, not-yet-cancelled visits only; history stays untouched.
    let res = sqlx::query(
        r#"
        UPDATE appointment a
        SET status = $2, updated_at = now()
        FROM series_occurrence so
        WHERE so.appointment_id = a.appointment_id
          AND so.series_id = $1
          AND a.visit_date >= $3
          AND a.status <> $2
        "#,
    )
    .bind(series_id)
    .bind(AppointmentStatus::Cancelled)
    .bind(today)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let cancelled_count = res.rows_affected() as i64;

    sqlx::query(
        r#"
        UPDATE series_occurrence so
        SET status = $2
        FROM appointment a
        WHERE a.appointment_id = so.appointment_id
          AND so.series_id = $1
          AND a.visit_date >= $3
        "#,
    )
    .bind(series_id)
    .bind(OccurrenceStatus::Cancelled)
    .bind(today)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(
        r#"
        UPDATE recurring_series
        SET status = $2
        WHERE series_id = $1
        "#,
    )
    .bind(series_id)
    .bind(SeriesStatus::Cancelled)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tracing::info!(%series_id, cancelled_count, "series cancelled");

    Ok(Json(ApiOk {
        data: CancelSeriesData {
            series_id,
            cancelled_count,
        },
    }))
}

/* ============================================================
   PATCH /series/occurrences/{appointment_id}
   ============================================================ */

/// Detach one visit from strict series semantics: the appointment itself is
/// edited (with the usual slot re-validation) and its occurrence is flagged
/// Modified. The parent series and sibling occurrences are untouched.
pub async fn edit_occurrence(
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

    let occurrence: Option<OccurrenceRow> = sqlx::query_as(
        r#"
        SELECT occurrence_id, series_id, appointment_id, programmed_date, status
        FROM series_occurrence
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let occurrence = occurrence.ok_or_else(ApiError::not_in_series)?;

    apply_edit(&mut tx, &state.schedule, appointment_id, &req).await?;

    sqlx::query(
        r#"
        UPDATE series_occurrence
        SET status = $2
        WHERE occurrence_id = $1
        "#,
    )
    .bind(occurrence.occurrence_id)
    .bind(OccurrenceStatus::Modified)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

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
