//! Availability index: the durable record of which slots are held.
//!
//! A reservation row exists exactly while its booking is PENDING or
//! CONFIRMED. Overlap between reservations of the same stylist is rejected
//! by a trigger in the database, so two transactions racing for one slot
//! cannot both commit. Mutations take a `Transaction` so they can only run
//! inside the caller's unit of work.

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction};
use serde::Serialize;

use crate::db::queries;
use crate::errors::BookingError;
use crate::models::slot::subtract;
use crate::models::Slot;

/// Proof that a slot was reserved for a booking inside the current transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationToken {
    pub booking_id: String,
    pub branch_id: String,
    pub stylist_id: Option<String>,
    pub slot: Slot,
}

/// True iff no held slot of `(branch, stylist)` overlaps `slot`.
/// Unassigned requests never conflict.
pub fn is_free(
    conn: &Connection,
    branch_id: &str,
    stylist_id: Option<&str>,
    slot: &Slot,
) -> Result<bool, BookingError> {
    let Some(stylist_id) = stylist_id else {
        return Ok(true);
    };
    let taken = queries::list_reserved_slots(conn, branch_id, stylist_id, slot)?;
    Ok(taken.is_empty())
}

pub fn reserve(
    tx: &Transaction,
    booking_id: &str,
    branch_id: &str,
    stylist_id: Option<&str>,
    slot: &Slot,
) -> Result<ReservationToken, BookingError> {
    queries::insert_reservation(tx, booking_id, branch_id, stylist_id, slot)?;
    tracing::debug!(booking_id, branch_id, stylist_id, start = %slot.start, end = %slot.end, "slot reserved");
    Ok(ReservationToken {
        booking_id: booking_id.to_string(),
        branch_id: branch_id.to_string(),
        stylist_id: stylist_id.map(str::to_string),
        slot: *slot,
    })
}

/// Moves an existing reservation. The overlap trigger ignores the row being moved.
pub fn move_reservation(tx: &Transaction, booking_id: &str, slot: &Slot) -> Result<(), BookingError> {
    if !queries::update_reservation_slot(tx, booking_id, slot)? {
        return Err(BookingError::NotFound(format!("reservation for booking {booking_id}")));
    }
    Ok(())
}

/// Returns whether a reservation was actually held.
pub fn release(tx: &Transaction, booking_id: &str) -> Result<bool, BookingError> {
    let released = queries::delete_reservation(tx, booking_id)?;
    if released {
        tracing::debug!(booking_id, "slot released");
    }
    Ok(released)
}

pub fn is_held(conn: &Connection, booking_id: &str) -> Result<bool, BookingError> {
    Ok(queries::get_reservation_slot(conn, booking_id)?.is_some())
}

pub fn occupied(
    conn: &Connection,
    branch_id: &str,
    stylist_id: &str,
    window: &Slot,
) -> Result<Vec<Slot>, BookingError> {
    Ok(queries::list_reserved_slots(conn, branch_id, stylist_id, window)?)
}

/// Free windows of a stylist during the branch's hours on a local date.
/// Without a stylist the whole opening window is free.
pub fn free_windows(
    conn: &Connection,
    branch_id: &str,
    stylist_id: Option<&str>,
    date: NaiveDate,
) -> Result<Vec<Slot>, BookingError> {
    let branch = queries::get_branch(conn, branch_id)?
        .ok_or_else(|| BookingError::NotFound(format!("branch {branch_id}")))?;
    let Some(hours) = branch.hours_on(date) else {
        return Ok(Vec::new());
    };
    match stylist_id {
        Some(stylist_id) => {
            let taken = occupied(conn, branch_id, stylist_id, &hours)?;
            Ok(subtract(&hours, &taken))
        }
        None => Ok(vec![hours]),
    }
}
