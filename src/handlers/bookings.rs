use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::check_auth;
use crate::db::{self, queries};
use crate::errors::{AppError, BookingError};
use crate::models::{Booking, ExternalSession, Payment};
use crate::services::effects;
use crate::services::lifecycle::Transition;
use crate::services::scheduling::{self, NewBooking};
use crate::state::AppState;

#[derive(Serialize)]
pub struct BookingDetail {
    #[serde(flatten)]
    pub booking: Booking,
    pub payments: Vec<Payment>,
    pub calendar_session: Option<ExternalSession>,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    #[serde(flatten)]
    pub booking: Booking,
    /// False when the booking was already terminal and nothing changed.
    pub changed: bool,
}

async fn respond_with_transition(state: &AppState, result: Transition) -> Json<TransitionResponse> {
    let changed = matches!(result, Transition::Applied { .. });
    let (booking, effects) = result.into_parts();
    effects::dispatch(state, effects).await;
    Json(TransitionResponse { booking, changed })
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewBooking>,
) -> Result<impl IntoResponse, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let (booking, effects) = {
        let mut conn = db::lock(&state.db);
        scheduling::create_booking(&mut conn, state.config.confirmation_policy, &req, Utc::now())?
    };
    effects::dispatch(&state, effects).await;

    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookingDetail>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let conn = db::lock(&state.db);
    let booking = scheduling::get_booking(&conn, &id)?;
    let payments = queries::list_payments_for_booking(&conn, &id).map_err(BookingError::from)?;
    let calendar_session = queries::get_active_session(&conn, &id).map_err(BookingError::from)?;

    Ok(Json(BookingDetail {
        booking,
        payments,
        calendar_session,
    }))
}

#[derive(Deserialize)]
pub struct RescheduleRequest {
    pub start_at: DateTime<Utc>,
}

// POST /api/bookings/:id/reschedule
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let (booking, effects) = {
        let mut conn = db::lock(&state.db);
        scheduling::reschedule_booking(&mut conn, &id, req.start_at, Utc::now())?
    };
    effects::dispatch(&state, effects).await;

    Ok(Json(booking))
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<TransitionResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();

    let result = {
        let mut conn = db::lock(&state.db);
        scheduling::cancel_booking(&mut conn, &id, req.reason.as_deref(), Utc::now())?
    };

    Ok(respond_with_transition(&state, result).await)
}

// POST /api/bookings/:id/confirm
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let result = {
        let mut conn = db::lock(&state.db);
        scheduling::confirm_booking(&mut conn, &id, Utc::now())?
    };

    Ok(respond_with_transition(&state, result).await)
}
