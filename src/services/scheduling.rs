//! Scheduler: the single entry point for creating, moving and cancelling
//! bookings. Each operation is one `BEGIN IMMEDIATE` transaction; the
//! reservation and the booking row commit together or not at all.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Deserialize;

use crate::config::ConfirmationPolicy;
use crate::db::queries;
use crate::errors::BookingError;
use crate::models::slot::{fmt_ts, truncate_to_seconds};
use crate::models::{Booking, BookingStatus, Branch, Slot};
use crate::services::availability;
use crate::services::effects::{BookingEvent, Effect};
use crate::services::lifecycle::{self, Transition};

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub branch_id: String,
    pub service_id: String,
    pub stylist_id: Option<String>,
    pub customer_id: Option<String>,
    pub start_at: DateTime<Utc>,
}

/// What a sweep touched, and the effects to run once it is done.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub booking_ids: Vec<String>,
    pub effects: Vec<Effect>,
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>, BookingError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn load_booking(conn: &Connection, id: &str) -> Result<Booking, BookingError> {
    queries::get_booking(conn, id)?.ok_or_else(|| BookingError::NotFound(format!("booking {id}")))
}

fn load_branch(conn: &Connection, id: &str) -> Result<Branch, BookingError> {
    queries::get_branch(conn, id)?.ok_or_else(|| BookingError::NotFound(format!("branch {id}")))
}

fn slot_within_hours(branch: &Branch, start: DateTime<Utc>, minutes: i64) -> Result<Slot, BookingError> {
    let slot = Slot::starting_at(truncate_to_seconds(start), minutes).ok_or(BookingError::OutsideHours)?;
    if !branch.is_open_during(&slot) {
        return Err(BookingError::OutsideHours);
    }
    Ok(slot)
}

pub fn get_booking(conn: &Connection, id: &str) -> Result<Booking, BookingError> {
    load_booking(conn, id)
}

pub fn create_booking(
    conn: &mut Connection,
    policy: ConfirmationPolicy,
    req: &NewBooking,
    now: DateTime<Utc>,
) -> Result<(Booking, Vec<Effect>), BookingError> {
    let service = queries::get_service(conn, &req.service_id)?
        .filter(|s| s.branch_id == req.branch_id)
        .ok_or_else(|| BookingError::NotFound(format!("service {} at branch {}", req.service_id, req.branch_id)))?;
    let branch = load_branch(conn, &req.branch_id)?;

    if let Some(stylist_id) = &req.stylist_id {
        queries::get_stylist(conn, stylist_id)?
            .filter(|s| s.branch_id == branch.id)
            .ok_or_else(|| BookingError::NotFound(format!("stylist {stylist_id} at branch {}", branch.id)))?;
    }

    let slot = slot_within_hours(&branch, req.start_at, service.duration_minutes)?;

    let status = match policy {
        ConfirmationPolicy::Immediate => BookingStatus::Confirmed,
        ConfirmationPolicy::AwaitPayment => BookingStatus::Pending,
    };
    let now = truncate_to_seconds(now);
    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        branch_id: branch.id.clone(),
        stylist_id: req.stylist_id.clone(),
        service_id: service.id.clone(),
        customer_id: req.customer_id.clone(),
        start_at: slot.start,
        end_at: slot.end,
        duration_minutes: service.duration_minutes,
        total_price_cents: service.price_cents,
        status,
        cancel_reason: None,
        created_at: now,
        updated_at: now,
    };

    let tx = begin(conn)?;
    if let Err(e) = availability::reserve(&tx, &booking.id, &booking.branch_id, booking.stylist_id.as_deref(), &slot) {
        if matches!(e, BookingError::Conflict) {
            tracing::info!(
                branch_id = %booking.branch_id,
                stylist_id = ?booking.stylist_id,
                start = %slot.start,
                "requested slot is taken"
            );
        }
        return Err(e);
    }
    queries::insert_booking(&tx, &booking)?;
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        status = %booking.status,
        start = %booking.start_at,
        "booking created"
    );

    let mut effects = vec![Effect::Publish(BookingEvent::Created {
        booking_id: booking.id.clone(),
        status: booking.status.to_string(),
    })];
    if let Some(customer) = &booking.customer_id {
        let message = match booking.status {
            BookingStatus::Confirmed => format!(
                "Your appointment on {} is confirmed.",
                booking.start_at.format("%Y-%m-%d %H:%M UTC")
            ),
            _ => format!(
                "We are holding {} for you until your payment goes through.",
                booking.start_at.format("%Y-%m-%d %H:%M UTC")
            ),
        };
        effects.push(Effect::Notify {
            user_id: customer.clone(),
            message,
        });
    }
    if booking.status == BookingStatus::Confirmed {
        effects.push(Effect::SyncCalendar {
            booking_id: booking.id.clone(),
        });
    }

    Ok((booking, effects))
}

/// Moves a live booking to `new_start`, keeping its snapshotted duration.
/// On conflict nothing changes: the old reservation is still held.
pub fn reschedule_booking(
    conn: &mut Connection,
    booking_id: &str,
    new_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(Booking, Vec<Effect>), BookingError> {
    let tx = begin(conn)?;
    let booking = load_booking(&tx, booking_id)?;
    if booking.status.is_terminal() {
        tracing::error!(booking_id, status = %booking.status, "reschedule requested on a terminal booking");
        return Err(BookingError::invalid(booking.status, "rescheduled"));
    }

    let branch = load_branch(&tx, &booking.branch_id)?;
    let slot = slot_within_hours(&branch, new_start, booking.duration_minutes)?;
    if slot == booking.slot() {
        return Ok((booking, Vec::new()));
    }

    availability::move_reservation(&tx, booking_id, &slot)?;
    let now = truncate_to_seconds(now);
    queries::update_booking_slot(&tx, booking_id, &slot, &now)?;
    let synced = queries::get_active_session(&tx, booking_id)?.is_some();
    tx.commit()?;

    tracing::info!(booking_id, from = %booking.start_at, to = %slot.start, "booking rescheduled");

    let mut updated = booking;
    updated.start_at = slot.start;
    updated.end_at = slot.end;
    updated.updated_at = now;

    let mut effects = Vec::new();
    if synced {
        effects.push(Effect::InvalidateCalendar {
            booking_id: updated.id.clone(),
        });
        effects.push(Effect::SyncCalendar {
            booking_id: updated.id.clone(),
        });
    }
    if let Some(customer) = &updated.customer_id {
        effects.push(Effect::Notify {
            user_id: customer.clone(),
            message: format!(
                "Your appointment has moved to {}.",
                updated.start_at.format("%Y-%m-%d %H:%M UTC")
            ),
        });
    }
    effects.push(Effect::Publish(BookingEvent::Rescheduled {
        booking_id: updated.id.clone(),
        start_at: fmt_ts(&updated.start_at),
        end_at: fmt_ts(&updated.end_at),
    }));

    Ok((updated, effects))
}

pub fn cancel_booking(
    conn: &mut Connection,
    booking_id: &str,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, BookingError> {
    drive(conn, booking_id, BookingStatus::Cancelled, reason, now)
}

/// Staff confirmation of a PENDING booking, e.g. when payment is taken at the desk.
pub fn confirm_booking(conn: &mut Connection, booking_id: &str, now: DateTime<Utc>) -> Result<Transition, BookingError> {
    drive(conn, booking_id, BookingStatus::Confirmed, None, now)
}

fn drive(
    conn: &mut Connection,
    booking_id: &str,
    target: BookingStatus,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, BookingError> {
    let tx = begin(conn)?;
    let booking = load_booking(&tx, booking_id)?;
    let result = lifecycle::transition(&tx, &booking, target, reason, truncate_to_seconds(now))?;
    tx.commit()?;
    Ok(result)
}

/// Cancels PENDING bookings created more than `timeout` ago.
pub fn expire_pending(conn: &mut Connection, timeout: Duration, now: DateTime<Utc>) -> Result<SweepReport, BookingError> {
    let stale = queries::list_stale_pending(conn, &(now - timeout))?;
    let mut report = SweepReport::default();
    for id in stale {
        // Each booking commits on its own; a concurrent cancel just makes this a no-op.
        match drive(conn, &id, BookingStatus::Cancelled, Some("payment timeout"), now) {
            Ok(Transition::Applied { effects, .. }) => {
                tracing::info!(booking_id = %id, "expired unpaid booking");
                report.booking_ids.push(id);
                report.effects.extend(effects);
            }
            Ok(Transition::AlreadyTerminal(_)) => {}
            Err(e) => tracing::warn!(booking_id = %id, error = %e, "failed to expire booking"),
        }
    }
    Ok(report)
}

/// Completes CONFIRMED bookings whose slot has ended.
pub fn complete_due(conn: &mut Connection, now: DateTime<Utc>) -> Result<SweepReport, BookingError> {
    let due = queries::list_due_for_completion(conn, &now)?;
    let mut report = SweepReport::default();
    for id in due {
        match drive(conn, &id, BookingStatus::Completed, None, now) {
            Ok(Transition::Applied { effects, .. }) => {
                report.booking_ids.push(id);
                report.effects.extend(effects);
            }
            Ok(Transition::AlreadyTerminal(_)) => {}
            Err(e) => tracing::warn!(booking_id = %id, error = %e, "failed to complete booking"),
        }
    }
    Ok(report)
}
