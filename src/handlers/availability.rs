use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::check_auth;
use crate::db;
use crate::errors::AppError;
use crate::models::Slot;
use crate::services::availability;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub branch_id: String,
    pub stylist_id: Option<String>,
    /// Branch-local date, `YYYY-MM-DD`.
    pub date: String,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub branch_id: String,
    pub stylist_id: Option<String>,
    pub date: NaiveDate,
    pub free: Vec<Slot>,
}

// GET /api/availability?branch_id=..&stylist_id=..&date=..
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date: {}", query.date)))?;

    let free = {
        let conn = db::lock(&state.db);
        availability::free_windows(&conn, &query.branch_id, query.stylist_id.as_deref(), date)?
    };

    Ok(Json(AvailabilityResponse {
        branch_id: query.branch_id,
        stylist_id: query.stylist_id,
        date,
        free,
    }))
}
