//! Booking state machine.
//!
//! Every status change of a booking goes through [`transition`], inside the
//! caller's transaction. Side effects that touch the outside world are
//! returned as [`Effect`]s and run only after commit.

use chrono::{DateTime, Utc};
use rusqlite::Transaction;

use crate::db::queries;
use crate::errors::BookingError;
use crate::models::{Booking, BookingStatus, PaymentStatus};
use crate::services::availability;
use crate::services::effects::{BookingEvent, Effect};

#[derive(Debug)]
pub enum Transition {
    Applied { booking: Booking, effects: Vec<Effect> },
    /// The booking had already reached a terminal state; nothing changed.
    AlreadyTerminal(Booking),
}

impl Transition {
    pub fn booking(&self) -> &Booking {
        match self {
            Transition::Applied { booking, .. } => booking,
            Transition::AlreadyTerminal(booking) => booking,
        }
    }

    pub fn into_parts(self) -> (Booking, Vec<Effect>) {
        match self {
            Transition::Applied { booking, effects } => (booking, effects),
            Transition::AlreadyTerminal(booking) => (booking, Vec::new()),
        }
    }
}

pub fn transition(
    tx: &Transaction,
    booking: &Booking,
    target: BookingStatus,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, BookingError> {
    if booking.status.is_terminal() {
        tracing::info!(
            booking_id = %booking.id,
            status = %booking.status,
            target = %target,
            "booking already terminal, ignoring transition"
        );
        return Ok(Transition::AlreadyTerminal(booking.clone()));
    }

    if !booking.status.can_transition_to(target) {
        tracing::error!(
            booking_id = %booking.id,
            from = %booking.status,
            to = %target,
            "illegal booking transition requested"
        );
        return Err(BookingError::invalid_booking_transition(booking.status, target));
    }

    let mut effects = Vec::new();

    match target {
        BookingStatus::Confirmed => {
            if !availability::is_held(tx, &booking.id)? {
                tracing::warn!(booking_id = %booking.id, "cannot confirm booking without a held slot");
                return Err(BookingError::Conflict);
            }
            if let Some(customer) = &booking.customer_id {
                effects.push(Effect::Notify {
                    user_id: customer.clone(),
                    message: format!("Your appointment on {} is confirmed.", booking.start_at.format("%Y-%m-%d %H:%M UTC")),
                });
            }
            effects.push(Effect::SyncCalendar {
                booking_id: booking.id.clone(),
            });
            effects.push(Effect::Publish(BookingEvent::Confirmed {
                booking_id: booking.id.clone(),
            }));
        }
        BookingStatus::Cancelled => {
            availability::release(tx, &booking.id)?;

            if queries::get_active_session(tx, &booking.id)?.is_some() {
                effects.push(Effect::InvalidateCalendar {
                    booking_id: booking.id.clone(),
                });
            }
            if let Some(payment) = queries::get_active_payment(tx, &booking.id)? {
                if payment.status == PaymentStatus::Succeeded {
                    effects.push(Effect::RefundRequired {
                        booking_id: booking.id.clone(),
                        payment_id: payment.id,
                    });
                }
            }
            if let Some(customer) = &booking.customer_id {
                effects.push(Effect::Notify {
                    user_id: customer.clone(),
                    message: format!("Your appointment on {} was cancelled.", booking.start_at.format("%Y-%m-%d %H:%M UTC")),
                });
            }
            effects.push(Effect::Publish(BookingEvent::Cancelled {
                booking_id: booking.id.clone(),
                reason: reason.map(str::to_string),
            }));
        }
        BookingStatus::Completed => {
            if now < booking.end_at {
                return Err(BookingError::invalid_booking_transition(booking.status, target));
            }
            availability::release(tx, &booking.id)?;
            effects.push(Effect::Publish(BookingEvent::Completed {
                booking_id: booking.id.clone(),
            }));
        }
        BookingStatus::Pending => {
            return Err(BookingError::invalid_booking_transition(booking.status, target));
        }
    }

    let reason = if target == BookingStatus::Cancelled { reason } else { None };
    queries::update_booking_status(tx, &booking.id, target, reason, &now)?;

    let mut updated = booking.clone();
    updated.status = target;
    updated.updated_at = now;
    if let Some(reason) = reason {
        updated.cancel_reason = Some(reason.to_string());
    }

    tracing::info!(booking_id = %booking.id, from = %booking.status, to = %target, "booking transitioned");

    Ok(Transition::Applied {
        booking: updated,
        effects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Slot;
    use crate::services::testing::{at, catalog, seed_booking_row, setup_db};
    use chrono::Duration;

    fn load(conn: &rusqlite::Connection, id: &str) -> Booking {
        queries::get_booking(conn, id).unwrap().unwrap()
    }

    #[test]
    fn confirm_requires_held_slot() {
        let mut conn = setup_db();
        let cat = catalog(&conn);
        let slot = Slot::starting_at(at(10, 0), 60).unwrap();

        let tx = conn.transaction().unwrap();
        seed_booking_row(&tx, "bk1", &cat, Some(&cat.stylist_a), slot);
        let booking = load(&tx, "bk1");
        let err = transition(&tx, &booking, BookingStatus::Confirmed, None, Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::Conflict));
        assert_eq!(load(&tx, "bk1").status, BookingStatus::Pending);

        availability::reserve(&tx, "bk1", &cat.branch, Some(&cat.stylist_a), &slot).unwrap();
        let result = transition(&tx, &booking, BookingStatus::Confirmed, None, Utc::now()).unwrap();
        assert_eq!(result.booking().status, BookingStatus::Confirmed);
        assert_eq!(load(&tx, "bk1").status, BookingStatus::Confirmed);
    }

    #[test]
    fn cancel_releases_reservation() {
        let mut conn = setup_db();
        let cat = catalog(&conn);
        let slot = Slot::starting_at(at(10, 0), 60).unwrap();

        let tx = conn.transaction().unwrap();
        seed_booking_row(&tx, "bk1", &cat, Some(&cat.stylist_a), slot);
        availability::reserve(&tx, "bk1", &cat.branch, Some(&cat.stylist_a), &slot).unwrap();
        let booking = load(&tx, "bk1");

        let (updated, effects) = transition(&tx, &booking, BookingStatus::Cancelled, Some("changed plans"), Utc::now())
            .unwrap()
            .into_parts();
        assert_eq!(updated.status, BookingStatus::Cancelled);
        assert_eq!(updated.cancel_reason.as_deref(), Some("changed plans"));
        assert!(!availability::is_held(&tx, "bk1").unwrap());
        assert!(effects.iter().any(|e| matches!(e, Effect::Publish(BookingEvent::Cancelled { .. }))));
        assert!(!effects.iter().any(|e| matches!(e, Effect::RefundRequired { .. })));
    }

    #[test]
    fn terminal_booking_is_a_no_op() {
        let mut conn = setup_db();
        let cat = catalog(&conn);
        let slot = Slot::starting_at(at(10, 0), 60).unwrap();

        let tx = conn.transaction().unwrap();
        seed_booking_row(&tx, "bk1", &cat, Some(&cat.stylist_a), slot);
        let booking = load(&tx, "bk1");
        transition(&tx, &booking, BookingStatus::Cancelled, Some("first"), Utc::now()).unwrap();

        let cancelled = load(&tx, "bk1");
        let again = transition(&tx, &cancelled, BookingStatus::Cancelled, Some("second"), Utc::now()).unwrap();
        assert!(matches!(again, Transition::AlreadyTerminal(_)));
        assert_eq!(load(&tx, "bk1").cancel_reason.as_deref(), Some("first"));
    }

    #[test]
    fn illegal_transition_leaves_state_untouched() {
        let mut conn = setup_db();
        let cat = catalog(&conn);
        let slot = Slot::starting_at(at(10, 0), 60).unwrap();

        let tx = conn.transaction().unwrap();
        seed_booking_row(&tx, "bk1", &cat, Some(&cat.stylist_a), slot);
        let booking = load(&tx, "bk1");
        let err = transition(&tx, &booking, BookingStatus::Completed, None, Utc::now()).unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));
        assert_eq!(load(&tx, "bk1"), booking);
    }

    #[test]
    fn complete_waits_for_end_of_slot() {
        let mut conn = setup_db();
        let cat = catalog(&conn);
        let slot = Slot::starting_at(at(10, 0), 60).unwrap();

        let tx = conn.transaction().unwrap();
        seed_booking_row(&tx, "bk1", &cat, Some(&cat.stylist_a), slot);
        availability::reserve(&tx, "bk1", &cat.branch, Some(&cat.stylist_a), &slot).unwrap();
        let booking = load(&tx, "bk1");
        let confirmed = transition(&tx, &booking, BookingStatus::Confirmed, None, at(8, 0))
            .unwrap()
            .into_parts()
            .0;

        let early = transition(&tx, &confirmed, BookingStatus::Completed, None, slot.end - Duration::minutes(1));
        assert!(matches!(early, Err(BookingError::InvalidTransition { .. })));

        let done = transition(&tx, &confirmed, BookingStatus::Completed, None, slot.end).unwrap();
        assert_eq!(done.booking().status, BookingStatus::Completed);
        assert!(!availability::is_held(&tx, "bk1").unwrap());
    }
}
