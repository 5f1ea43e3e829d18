//! External calendar sync.
//!
//! A booking gets at most one active session, created once it is CONFIRMED
//! (and paid, under the await-payment policy). Cancelling invalidates the
//! session locally even when the provider call fails.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::ConfirmationPolicy;
use crate::db::{self, queries};
use crate::errors::BookingError;
use crate::models::slot::truncate_to_seconds;
use crate::models::{Booking, BookingStatus, CalendarKind, ExternalSession, PaymentStatus, SessionStatus};
use crate::state::AppState;

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn kind(&self) -> CalendarKind;
    async fn create_event(&self, booking: &Booking) -> anyhow::Result<String>;
    async fn delete_event(&self, session_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub enum SyncPlan {
    /// Not eligible yet (or any more).
    Skip,
    Existing(ExternalSession),
    Create(Booking),
}

pub fn plan_sync(conn: &Connection, booking_id: &str, policy: ConfirmationPolicy) -> Result<SyncPlan, BookingError> {
    let booking = queries::get_booking(conn, booking_id)?
        .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))?;

    if booking.status != BookingStatus::Confirmed {
        return Ok(SyncPlan::Skip);
    }
    if policy == ConfirmationPolicy::AwaitPayment {
        let paid = queries::get_active_payment(conn, booking_id)?
            .is_some_and(|p| p.status == PaymentStatus::Succeeded);
        if !paid {
            return Ok(SyncPlan::Skip);
        }
    }
    if let Some(existing) = queries::get_active_session(conn, booking_id)? {
        return Ok(SyncPlan::Existing(existing));
    }
    Ok(SyncPlan::Create(booking))
}

/// Stores a freshly created provider event. Returns `None` when the booking
/// stopped being CONFIRMED or another session won in the meantime.
pub fn record_session(
    conn: &Connection,
    booking_id: &str,
    provider: CalendarKind,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<ExternalSession>, BookingError> {
    let still_confirmed = queries::get_booking(conn, booking_id)?
        .is_some_and(|b| b.status == BookingStatus::Confirmed);
    if !still_confirmed {
        return Ok(None);
    }

    let session = ExternalSession {
        id: uuid::Uuid::new_v4().to_string(),
        booking_id: booking_id.to_string(),
        provider,
        session_id: session_id.to_string(),
        status: SessionStatus::Active,
        acknowledged_at: None,
        created_at: truncate_to_seconds(now),
        invalidated_at: None,
    };
    if !queries::insert_session(conn, &session)? {
        return Ok(None);
    }
    Ok(Some(session))
}

pub async fn sync_booking(state: &AppState, booking_id: &str) -> Result<Option<ExternalSession>, BookingError> {
    let plan = {
        let conn = db::lock(&state.db);
        plan_sync(&conn, booking_id, state.config.confirmation_policy)?
    };

    let booking = match plan {
        SyncPlan::Skip => {
            tracing::debug!(booking_id, "booking not eligible for calendar sync");
            return Ok(None);
        }
        SyncPlan::Existing(session) => return Ok(Some(session)),
        SyncPlan::Create(booking) => booking,
    };

    let session_id = state
        .calendar
        .create_event(&booking)
        .await
        .map_err(|e| BookingError::Provider(e.to_string()))?;

    let recorded = {
        let conn = db::lock(&state.db);
        record_session(&conn, booking_id, state.calendar.kind(), &session_id, Utc::now())?
    };

    match recorded {
        Some(session) => {
            tracing::info!(booking_id, session_id = %session.session_id, "booking synced to calendar");
            Ok(Some(session))
        }
        None => {
            // Lost a race with a cancellation or a concurrent sync.
            if let Err(e) = state.calendar.delete_event(&session_id).await {
                tracing::warn!(error = %e, booking_id, session_id = %session_id, "failed to remove orphaned calendar event");
            }
            Ok(None)
        }
    }
}

const RESYNC_BATCH: i64 = 50;

/// Retries sync for confirmed bookings whose earlier attempt never produced a
/// session. Returns how many got one.
pub async fn resync_unsynced(state: &AppState) -> Result<usize, BookingError> {
    let candidates = {
        let conn = db::lock(&state.db);
        queries::list_unsynced_confirmed(&conn, &truncate_to_seconds(Utc::now()), RESYNC_BATCH)?
    };

    let mut synced = 0;
    for booking_id in candidates {
        match sync_booking(state, &booking_id).await {
            Ok(Some(_)) => synced += 1,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, booking_id = %booking_id, "calendar resync failed"),
        }
    }
    Ok(synced)
}

/// Best effort on the provider side; the local session is always invalidated.
pub async fn invalidate_booking(state: &AppState, booking_id: &str) -> Result<(), BookingError> {
    let session = {
        let conn = db::lock(&state.db);
        queries::get_active_session(&conn, booking_id)?
    };
    let Some(session) = session else {
        return Ok(());
    };

    if let Err(e) = state.calendar.delete_event(&session.session_id).await {
        tracing::warn!(
            error = %e,
            booking_id,
            session_id = %session.session_id,
            "calendar provider failed to delete event"
        );
    }

    let conn = db::lock(&state.db);
    queries::invalidate_session(&conn, &session.id, &truncate_to_seconds(Utc::now()))?;
    tracing::info!(booking_id, session_id = %session.session_id, "calendar session invalidated");
    Ok(())
}

/// Provider confirmed it holds the event. Repeats are no-ops.
pub fn acknowledge(conn: &Connection, session_id: &str, now: DateTime<Utc>) -> Result<bool, BookingError> {
    let session = queries::get_session_by_provider_id(conn, session_id)?
        .ok_or_else(|| BookingError::NotFound(format!("calendar session {session_id}")))?;
    Ok(queries::acknowledge_session(conn, &session.id, &truncate_to_seconds(now))?)
}

/// Provider reports the event was removed on its side. Repeats are no-ops.
pub fn provider_deleted(conn: &Connection, session_id: &str, now: DateTime<Utc>) -> Result<bool, BookingError> {
    let session = queries::get_session_by_provider_id(conn, session_id)?
        .ok_or_else(|| BookingError::NotFound(format!("calendar session {session_id}")))?;
    Ok(queries::invalidate_session(conn, &session.id, &truncate_to_seconds(now))?)
}

pub fn generate_ics(booking: &Booking, branch_name: &str, service_name: &str) -> String {
    let dtstart = booking.start_at.format("%Y%m%dT%H%M%SZ").to_string();
    let dtend = booking.end_at.format("%Y%m%dT%H%M%SZ").to_string();
    let dtstamp = booking.created_at.format("%Y%m%dT%H%M%SZ").to_string();
    let uid = format!("{}@salonbook", booking.id);

    let summary = format!("{service_name} at {branch_name}");
    let status = match booking.status {
        BookingStatus::Pending => "TENTATIVE",
        BookingStatus::Confirmed | BookingStatus::Completed => "CONFIRMED",
        BookingStatus::Cancelled => "CANCELLED",
    };

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Salonbook//Bookings//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         LOCATION:{branch_name}\r\n\
         STATUS:{status}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}
