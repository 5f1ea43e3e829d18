use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::BookingStatus;

/// Failures of the scheduling core. Storage errors are translated into this
/// taxonomy at the service boundary and never reach callers raw.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("that time slot is already taken")]
    Conflict,

    #[error("requested time is outside the branch's operating hours")]
    OutsideHours,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid booking transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("payment amount {actual} does not match booking total {expected}")]
    AmountMismatch { expected: i64, actual: i64 },

    #[error("an active payment already exists for this booking")]
    PaymentExists,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("storage failure")]
    Storage(String),
}

impl BookingError {
    pub fn invalid_booking_transition(from: BookingStatus, to: BookingStatus) -> Self {
        BookingError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        BookingError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<rusqlite::Error> for BookingError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref code, ref message) = err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                let message = message.as_deref().unwrap_or("");
                if message.contains("slot_conflict") {
                    return BookingError::Conflict;
                }
                if message.contains("payments.booking_id") {
                    return BookingError::PaymentExists;
                }
            }
        }
        BookingError::Storage(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Booking(e) => match e {
                BookingError::Conflict => StatusCode::CONFLICT,
                BookingError::OutsideHours => StatusCode::UNPROCESSABLE_ENTITY,
                BookingError::NotFound(_) => StatusCode::NOT_FOUND,
                BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
                BookingError::AmountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                BookingError::PaymentExists => StatusCode::CONFLICT,
                BookingError::Provider(_) => StatusCode::BAD_GATEWAY,
                BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidSignature => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        // Invariant violations and storage faults get a generic message;
        // operators get the detail in the log.
        let message = match &self {
            AppError::Booking(BookingError::InvalidTransition { from, to }) => {
                tracing::error!(from = %from, to = %to, "rejected invalid booking transition");
                "the booking could not be updated, please try again".to_string()
            }
            AppError::Booking(BookingError::Storage(detail)) => {
                tracing::error!(error = %detail, "storage failure");
                "internal error, please try again".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
