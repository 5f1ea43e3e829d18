use std::sync::Arc;

use chrono::Utc;

use crate::db;
use crate::services::{calendar, effects, scheduling, webhook};
use crate::state::AppState;

/// Background task: expires unpaid bookings, completes finished ones,
/// retries failed webhooks and re-drives missed calendar syncs.
pub async fn run_sweeper(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.sweep_interval());
    loop {
        interval.tick().await;
        sweep_once(&state).await;
    }
}

pub async fn sweep_once(state: &AppState) {
    let now = Utc::now();

    let expired = {
        let mut conn = db::lock(&state.db);
        scheduling::expire_pending(&mut conn, state.config.pending_timeout(), now)
    };
    match expired {
        Ok(report) => {
            if !report.booking_ids.is_empty() {
                tracing::info!(count = report.booking_ids.len(), "expired unpaid bookings");
            }
            effects::dispatch(state, report.effects).await;
        }
        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
    }

    let completed = {
        let mut conn = db::lock(&state.db);
        scheduling::complete_due(&mut conn, now)
    };
    match completed {
        Ok(report) => {
            if !report.booking_ids.is_empty() {
                tracing::info!(count = report.booking_ids.len(), "completed finished bookings");
            }
            effects::dispatch(state, report.effects).await;
        }
        Err(e) => tracing::error!(error = %e, "completion sweep failed"),
    }

    match webhook::retry_failed(state).await {
        Ok(0) => {}
        Ok(n) => tracing::info!(recovered = n, "retried failed webhooks"),
        Err(e) => tracing::error!(error = %e, "webhook retry sweep failed"),
    }

    match calendar::resync_unsynced(state).await {
        Ok(0) => {}
        Ok(n) => tracing::info!(synced = n, "synced bookings missing a calendar session"),
        Err(e) => tracing::error!(error = %e, "calendar resync sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfirmationPolicy;
    use crate::db::queries;
    use crate::models::BookingStatus;
    use crate::services::availability;
    use crate::services::scheduling::NewBooking;
    use crate::services::testing::{at, catalog, setup_db, test_state};
    use chrono::Duration;

    #[tokio::test]
    async fn test_sweep_expires_stale_pending_booking() {
        let mut conn = setup_db();
        let cat = catalog(&conn);
        let req = NewBooking {
            branch_id: cat.branch.clone(),
            service_id: cat.haircut.clone(),
            stylist_id: Some(cat.stylist_a.clone()),
            customer_id: None,
            start_at: at(10, 0),
        };
        let created_at = Utc::now() - Duration::minutes(30);
        let (booking, _) =
            scheduling::create_booking(&mut conn, ConfirmationPolicy::AwaitPayment, &req, created_at).unwrap();
        let state = test_state(conn);

        sweep_once(&state).await;

        let conn = db::lock(&state.db);
        let stored = queries::get_booking(&conn, &booking.id).unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.cancel_reason.as_deref(), Some("payment timeout"));
        assert!(!availability::is_held(&conn, &booking.id).unwrap());
    }
}
