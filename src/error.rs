use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::schedule::SlotError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

/// Business-rule failures are plain values returned to the caller; only
/// unexpected persistence errors go through `Internal`. The UI keys its
/// retry behavior off the `code` field, so codes stay stable.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    /// All rooms taken for the requested slot.
    pub fn slot_full(date: NaiveDate, time: NaiveTime) -> Self {
        ApiError::Conflict(
            "SLOT_FULL",
            format!("no rooms available on {date} at {time}"),
        )
    }

    /// A concurrent booking won the room while this request was committing.
    pub fn slot_taken(date: NaiveDate, time: NaiveTime) -> Self {
        ApiError::Conflict(
            "SLOT_TAKEN",
            format!("the slot on {date} at {time} was just taken"),
        )
    }

    pub fn duplicate_patient(phone: &str) -> Self {
        ApiError::BadRequest(
            "DUPLICATE_PATIENT",
            format!("a patient with phone {phone} already exists"),
        )
    }

    pub fn not_in_series() -> Self {
        ApiError::BadRequest(
            "NOT_IN_SERIES",
            "appointment does not belong to a recurring series".into(),
        )
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<SlotError> for ApiError {
    fn from(e: SlotError) -> Self {
        ApiError::validation(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}
