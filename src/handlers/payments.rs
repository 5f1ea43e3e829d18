use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::check_auth;
use crate::db;
use crate::errors::AppError;
use crate::models::{Payment, PaymentMethod, RefundAuthorization};
use crate::services::{effects, payments};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AttachPaymentRequest {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

// POST /api/bookings/:id/payments
pub async fn attach_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
    Json(req): Json<AttachPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let payment = payments::attach_payment(
        &state.db,
        state.gateway.as_ref(),
        &booking_id,
        req.method,
        req.amount_cents,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

// POST /api/payments/:id/refund
pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
    Json(authorization): Json<RefundAuthorization>,
) -> Result<Json<Payment>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if let RefundAuthorization::StaffApproved { staff_id } = &authorization {
        if staff_id.trim().is_empty() {
            return Err(AppError::BadRequest("staff_id is required".into()));
        }
    }

    let (payment, effects) = {
        let mut conn = db::lock(&state.db);
        payments::refund(&mut conn, &payment_id, &authorization, Utc::now())?
    };
    effects::dispatch(&state, effects).await;

    Ok(Json(payment))
}
