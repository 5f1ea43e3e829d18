//! Post-commit side effects and the booking event feed.

use serde::Serialize;

use crate::services::calendar;
use crate::state::AppState;

/// Work a committed transaction leaves for the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notify { user_id: String, message: String },
    SyncCalendar { booking_id: String },
    InvalidateCalendar { booking_id: String },
    RefundRequired { booking_id: String, payment_id: String },
    Publish(BookingEvent),
}

/// Lifecycle events broadcast to operators over `/api/events`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingEvent {
    Created { booking_id: String, status: String },
    Confirmed { booking_id: String },
    Rescheduled { booking_id: String, start_at: String, end_at: String },
    Cancelled { booking_id: String, reason: Option<String> },
    Completed { booking_id: String },
    PaymentSucceeded { booking_id: String, payment_id: String },
    PaymentFailed { booking_id: String, payment_id: String },
    RefundRequired { booking_id: String, payment_id: String },
    Refunded { booking_id: String, payment_id: String },
}

/// Runs effects in order. Failures are logged and never propagate: the
/// booking change they follow is already committed.
pub async fn dispatch(state: &AppState, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Notify { user_id, message } => {
                if let Err(e) = state.notifier.notify(&user_id, &message).await {
                    tracing::warn!(error = %e, user_id = %user_id, "notification failed");
                }
            }
            Effect::SyncCalendar { booking_id } => {
                if let Err(e) = calendar::sync_booking(state, &booking_id).await {
                    tracing::warn!(error = %e, booking_id = %booking_id, "calendar sync failed");
                }
            }
            Effect::InvalidateCalendar { booking_id } => {
                if let Err(e) = calendar::invalidate_booking(state, &booking_id).await {
                    tracing::warn!(error = %e, booking_id = %booking_id, "calendar invalidation failed");
                }
            }
            Effect::RefundRequired { booking_id, payment_id } => {
                tracing::warn!(
                    booking_id = %booking_id,
                    payment_id = %payment_id,
                    "cancelled booking holds a settled payment, refund required"
                );
                publish(state, BookingEvent::RefundRequired { booking_id, payment_id });
            }
            Effect::Publish(event) => publish(state, event),
        }
    }
}

pub fn publish(state: &AppState, event: BookingEvent) {
    // No subscribers is fine.
    let _ = state.events_tx.send(event);
}
