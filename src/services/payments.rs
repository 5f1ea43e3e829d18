//! Payment reconciliation ledger.
//!
//! At most one non-FAILED payment exists per booking, which also bounds a
//! booking to a single SUCCEEDED payment. Provider outcomes reach the ledger
//! as [`LedgerCommand`]s sent by webhook intake to a single worker task.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tokio::sync::{mpsc, oneshot};

use crate::db::{self, queries};
use crate::errors::BookingError;
use crate::models::slot::truncate_to_seconds;
use crate::models::{BookingStatus, Payment, PaymentMethod, PaymentStatus, RefundAuthorization};
use crate::services::effects::{BookingEvent, Effect};
use crate::services::gateway::PaymentGateway;
use crate::services::lifecycle;

fn load_payment(conn: &Connection, id: &str) -> Result<Payment, BookingError> {
    queries::get_payment(conn, id)?.ok_or_else(|| BookingError::NotFound(format!("payment {id}")))
}

/// Inserts a PENDING payment for a live booking.
pub fn open_payment(
    conn: &mut Connection,
    booking_id: &str,
    method: PaymentMethod,
    amount_cents: i64,
    now: DateTime<Utc>,
) -> Result<Payment, BookingError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let booking = queries::get_booking(&tx, booking_id)?
        .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))?;

    if amount_cents != booking.total_price_cents {
        return Err(BookingError::AmountMismatch {
            expected: booking.total_price_cents,
            actual: amount_cents,
        });
    }
    if !booking.status.holds_slot() {
        return Err(BookingError::invalid(booking.status, "paid"));
    }
    if queries::get_active_payment(&tx, booking_id)?.is_some() {
        return Err(BookingError::PaymentExists);
    }

    let now = truncate_to_seconds(now);
    let payment = Payment {
        id: uuid::Uuid::new_v4().to_string(),
        booking_id: booking_id.to_string(),
        method,
        status: PaymentStatus::Pending,
        amount_cents,
        provider_intent_id: None,
        created_at: now,
        updated_at: now,
    };
    queries::insert_payment(&tx, &payment)?;
    tx.commit()?;

    tracing::info!(payment_id = %payment.id, booking_id, amount_cents, "payment attempt opened");
    Ok(payment)
}

/// Opens a payment and asks the gateway for an intent. A gateway failure
/// marks the attempt FAILED so the customer can try again.
pub async fn attach_payment(
    db: &Mutex<Connection>,
    gateway: &dyn PaymentGateway,
    booking_id: &str,
    method: PaymentMethod,
    amount_cents: i64,
) -> Result<Payment, BookingError> {
    let mut payment = {
        let mut conn = db::lock(db);
        open_payment(&mut conn, booking_id, method, amount_cents, Utc::now())?
    };

    match gateway.create_intent(amount_cents, method).await {
        Ok(intent_id) => {
            let now = truncate_to_seconds(Utc::now());
            let conn = db::lock(db);
            queries::set_payment_intent(&conn, &payment.id, &intent_id, &now)?;
            payment.provider_intent_id = Some(intent_id);
            payment.updated_at = now;
            Ok(payment)
        }
        Err(e) => {
            tracing::error!(error = %e, payment_id = %payment.id, "payment gateway rejected intent");
            let now = truncate_to_seconds(Utc::now());
            let conn = db::lock(db);
            queries::update_payment_status(&conn, &payment.id, PaymentStatus::Failed, &now)?;
            Err(BookingError::Provider(e.to_string()))
        }
    }
}

/// PENDING -> SUCCEEDED. A PENDING booking is confirmed in the same
/// transaction; a CANCELLED one yields a refund-required effect.
pub fn mark_succeeded(
    conn: &mut Connection,
    payment_id: &str,
    intent_id: &str,
    now: DateTime<Utc>,
) -> Result<(Payment, Vec<Effect>), BookingError> {
    let now = truncate_to_seconds(now);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut payment = load_payment(&tx, payment_id)?;

    match payment.status {
        PaymentStatus::Succeeded if payment.provider_intent_id.as_deref() == Some(intent_id) => {
            tracing::info!(payment_id, intent_id, "payment already settled with this intent");
            return Ok((payment, Vec::new()));
        }
        PaymentStatus::Pending => {}
        other => {
            tracing::error!(payment_id, status = %other, intent_id, "cannot settle payment");
            return Err(BookingError::invalid(other, PaymentStatus::Succeeded));
        }
    }
    if let Some(existing) = payment.provider_intent_id.as_deref() {
        if existing != intent_id {
            tracing::error!(payment_id, expected = existing, got = intent_id, "intent does not match payment");
            return Err(BookingError::invalid(payment.status, PaymentStatus::Succeeded));
        }
    }

    queries::set_payment_intent(&tx, payment_id, intent_id, &now)?;
    queries::update_payment_status(&tx, payment_id, PaymentStatus::Succeeded, &now)?;
    payment.status = PaymentStatus::Succeeded;
    payment.provider_intent_id = Some(intent_id.to_string());
    payment.updated_at = now;

    let booking = queries::get_booking(&tx, &payment.booking_id)?
        .ok_or_else(|| BookingError::NotFound(format!("booking {}", payment.booking_id)))?;

    let mut effects = Vec::new();
    match booking.status {
        BookingStatus::Pending => {
            let (_, confirm_effects) =
                lifecycle::transition(&tx, &booking, BookingStatus::Confirmed, None, now)?.into_parts();
            effects.extend(confirm_effects);
        }
        BookingStatus::Confirmed => effects.push(Effect::SyncCalendar {
            booking_id: booking.id.clone(),
        }),
        BookingStatus::Cancelled => effects.push(Effect::RefundRequired {
            booking_id: booking.id.clone(),
            payment_id: payment.id.clone(),
        }),
        BookingStatus::Completed => {}
    }
    effects.push(Effect::Publish(BookingEvent::PaymentSucceeded {
        booking_id: booking.id.clone(),
        payment_id: payment.id.clone(),
    }));

    tx.commit()?;
    tracing::info!(payment_id, booking_id = %booking.id, "payment succeeded");
    Ok((payment, effects))
}

/// PENDING -> FAILED. The booking is left as it is; the expiry sweep owns
/// unpaid bookings.
pub fn mark_failed(
    conn: &mut Connection,
    payment_id: &str,
    now: DateTime<Utc>,
) -> Result<(Payment, Vec<Effect>), BookingError> {
    let now = truncate_to_seconds(now);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut payment = load_payment(&tx, payment_id)?;

    match payment.status {
        PaymentStatus::Failed => return Ok((payment, Vec::new())),
        PaymentStatus::Pending => {}
        other => {
            tracing::error!(payment_id, status = %other, "cannot fail a settled payment");
            return Err(BookingError::invalid(other, PaymentStatus::Failed));
        }
    }

    queries::update_payment_status(&tx, payment_id, PaymentStatus::Failed, &now)?;
    tx.commit()?;

    payment.status = PaymentStatus::Failed;
    payment.updated_at = now;
    tracing::info!(payment_id, booking_id = %payment.booking_id, "payment failed");

    let effects = vec![Effect::Publish(BookingEvent::PaymentFailed {
        booking_id: payment.booking_id.clone(),
        payment_id: payment.id.clone(),
    })];
    Ok((payment, effects))
}

/// SUCCEEDED -> REFUNDED, for a cancelled booking or with staff approval.
/// The money movement itself happens at the provider.
pub fn refund(
    conn: &mut Connection,
    payment_id: &str,
    authorization: &RefundAuthorization,
    now: DateTime<Utc>,
) -> Result<(Payment, Vec<Effect>), BookingError> {
    let now = truncate_to_seconds(now);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut payment = load_payment(&tx, payment_id)?;

    match payment.status {
        PaymentStatus::Refunded => return Ok((payment, Vec::new())),
        PaymentStatus::Succeeded => {}
        other => return Err(BookingError::invalid(other, PaymentStatus::Refunded)),
    }

    let booking = queries::get_booking(&tx, &payment.booking_id)?
        .ok_or_else(|| BookingError::NotFound(format!("booking {}", payment.booking_id)))?;
    match authorization {
        RefundAuthorization::BookingCancelled if booking.status != BookingStatus::Cancelled => {
            tracing::warn!(payment_id, booking_status = %booking.status, "refund requested for a live booking");
            return Err(BookingError::invalid(payment.status, PaymentStatus::Refunded));
        }
        RefundAuthorization::BookingCancelled => {}
        RefundAuthorization::StaffApproved { staff_id } => {
            tracing::info!(payment_id, staff_id = %staff_id, "staff approved refund");
        }
    }

    queries::update_payment_status(&tx, payment_id, PaymentStatus::Refunded, &now)?;
    tx.commit()?;

    payment.status = PaymentStatus::Refunded;
    payment.updated_at = now;
    let effects = vec![Effect::Publish(BookingEvent::Refunded {
        booking_id: payment.booking_id.clone(),
        payment_id: payment.id.clone(),
    })];
    Ok((payment, effects))
}

// ── Ledger worker ──

pub type LedgerReply = Result<(Payment, Vec<Effect>), BookingError>;

pub enum LedgerCommand {
    Succeeded {
        payment_id: String,
        intent_id: String,
        response: oneshot::Sender<LedgerReply>,
    },
    Failed {
        payment_id: String,
        response: oneshot::Sender<LedgerReply>,
    },
}

/// Sending side of the ledger worker.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerCommand>,
}

impl LedgerHandle {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(db: Arc<Mutex<Connection>>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(ledger_loop(db, rx));
        Self { tx }
    }

    pub async fn succeeded(&self, payment_id: &str, intent_id: &str) -> LedgerReply {
        let (response, rx) = oneshot::channel();
        self.send(
            LedgerCommand::Succeeded {
                payment_id: payment_id.to_string(),
                intent_id: intent_id.to_string(),
                response,
            },
            rx,
        )
        .await
    }

    pub async fn failed(&self, payment_id: &str) -> LedgerReply {
        let (response, rx) = oneshot::channel();
        self.send(
            LedgerCommand::Failed {
                payment_id: payment_id.to_string(),
                response,
            },
            rx,
        )
        .await
    }

    async fn send(&self, cmd: LedgerCommand, rx: oneshot::Receiver<LedgerReply>) -> LedgerReply {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| BookingError::Storage("ledger worker shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Storage("ledger worker dropped response".into()))?
    }
}

async fn ledger_loop(db: Arc<Mutex<Connection>>, mut rx: mpsc::Receiver<LedgerCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LedgerCommand::Succeeded {
                payment_id,
                intent_id,
                response,
            } => {
                let result = {
                    let mut conn = db::lock(&db);
                    mark_succeeded(&mut conn, &payment_id, &intent_id, Utc::now())
                };
                let _ = response.send(result);
            }
            LedgerCommand::Failed { payment_id, response } => {
                let result = {
                    let mut conn = db::lock(&db);
                    mark_failed(&mut conn, &payment_id, Utc::now())
                };
                let _ = response.send(result);
            }
        }
    }
    tracing::debug!("ledger worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfirmationPolicy;
    use crate::models::Booking;
    use crate::services::availability;
    use crate::services::scheduling::{self, NewBooking};
    use crate::services::testing::{at, catalog, setup_db};
    use async_trait::async_trait;

    fn book(conn: &mut Connection, policy: ConfirmationPolicy) -> Booking {
        let cat = catalog(conn);
        let req = NewBooking {
            branch_id: cat.branch.clone(),
            service_id: cat.haircut.clone(),
            stylist_id: Some(cat.stylist_a.clone()),
            customer_id: Some("cust-1".into()),
            start_at: at(10, 0),
        };
        scheduling::create_booking(conn, policy, &req, at(8, 0)).unwrap().0
    }

    #[test]
    fn test_amount_must_match_snapshot() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let err = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4000, at(8, 1)).unwrap_err();
        assert!(matches!(err, BookingError::AmountMismatch { expected: 4500, actual: 4000 }));
    }

    #[test]
    fn test_success_confirms_pending_booking() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let payment = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 1)).unwrap();

        let (paid, effects) = mark_succeeded(&mut conn, &payment.id, "pi_1", at(8, 2)).unwrap();
        assert_eq!(paid.status, PaymentStatus::Succeeded);
        assert_eq!(paid.provider_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(
            queries::get_booking(&conn, &booking.id).unwrap().unwrap().status,
            BookingStatus::Confirmed
        );
        assert!(effects.iter().any(|e| matches!(e, Effect::SyncCalendar { .. })));
        assert!(availability::is_held(&conn, &booking.id).unwrap());
    }

    #[test]
    fn test_same_intent_twice_is_a_no_op() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let payment = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 1)).unwrap();

        let (first, _) = mark_succeeded(&mut conn, &payment.id, "pi_1", at(8, 2)).unwrap();
        let (second, effects) = mark_succeeded(&mut conn, &payment.id, "pi_1", at(8, 3)).unwrap();
        assert_eq!(first, second);
        assert!(effects.is_empty());

        let other = mark_succeeded(&mut conn, &payment.id, "pi_2", at(8, 4));
        assert!(matches!(other, Err(BookingError::InvalidTransition { .. })));
    }

    #[test]
    fn test_no_second_payment_after_success() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let payment = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 1)).unwrap();
        mark_succeeded(&mut conn, &payment.id, "pi_1", at(8, 2)).unwrap();

        let err = open_payment(&mut conn, &booking.id, PaymentMethod::Cash, 4500, at(8, 3)).unwrap_err();
        assert!(matches!(err, BookingError::PaymentExists));

        let succeeded = queries::list_payments_for_booking(&conn, &booking.id)
            .unwrap()
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .count();
        assert_eq!(succeeded, 1);
    }

    #[test]
    fn test_failed_attempt_allows_retry_and_keeps_booking() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let first = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 1)).unwrap();

        assert!(matches!(
            open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 2)),
            Err(BookingError::PaymentExists)
        ));

        let (failed, _) = mark_failed(&mut conn, &first.id, at(8, 3)).unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);
        let (again, effects) = mark_failed(&mut conn, &first.id, at(8, 4)).unwrap();
        assert_eq!(again.status, PaymentStatus::Failed);
        assert!(effects.is_empty());
        assert_eq!(
            queries::get_booking(&conn, &booking.id).unwrap().unwrap().status,
            BookingStatus::Pending
        );

        let retry = open_payment(&mut conn, &booking.id, PaymentMethod::Wallet, 4500, at(8, 5)).unwrap();
        assert_eq!(retry.status, PaymentStatus::Pending);
        assert!(matches!(
            mark_succeeded(&mut conn, &first.id, "pi_late", at(8, 6)),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_payment_on_cancelled_booking_requires_refund() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let payment = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 1)).unwrap();
        scheduling::cancel_booking(&mut conn, &booking.id, Some("payment timeout"), at(8, 20)).unwrap();

        let (_, effects) = mark_succeeded(&mut conn, &payment.id, "pi_1", at(8, 21)).unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::RefundRequired { .. })));
        assert_eq!(
            queries::get_booking(&conn, &booking.id).unwrap().unwrap().status,
            BookingStatus::Cancelled
        );

        let (refunded, _) = refund(&mut conn, &payment.id, &RefundAuthorization::BookingCancelled, at(9, 0)).unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert!(matches!(
            open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(9, 1)),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_refund_needs_cancellation_or_staff() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let payment = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 1)).unwrap();

        assert!(matches!(
            refund(&mut conn, &payment.id, &RefundAuthorization::BookingCancelled, at(8, 2)),
            Err(BookingError::InvalidTransition { .. })
        ));

        mark_succeeded(&mut conn, &payment.id, "pi_1", at(8, 3)).unwrap();
        assert!(matches!(
            refund(&mut conn, &payment.id, &RefundAuthorization::BookingCancelled, at(8, 4)),
            Err(BookingError::InvalidTransition { .. })
        ));

        let staff = RefundAuthorization::StaffApproved {
            staff_id: "staff-9".into(),
        };
        let (refunded, _) = refund(&mut conn, &payment.id, &staff, at(8, 5)).unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_cancelling_paid_booking_emits_refund_required() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let payment = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, at(8, 1)).unwrap();
        mark_succeeded(&mut conn, &payment.id, "pi_1", at(8, 2)).unwrap();

        let (_, effects) = scheduling::cancel_booking(&mut conn, &booking.id, None, at(8, 30))
            .unwrap()
            .into_parts();
        assert!(effects.contains(&Effect::RefundRequired {
            booking_id: booking.id.clone(),
            payment_id: payment.id.clone(),
        }));
    }

    struct FixedGateway(Option<&'static str>);

    #[async_trait]
    impl PaymentGateway for FixedGateway {
        async fn create_intent(&self, _amount_cents: i64, _method: PaymentMethod) -> anyhow::Result<String> {
            match self.0 {
                Some(id) => Ok(id.to_string()),
                None => anyhow::bail!("gateway unavailable"),
            }
        }
    }

    #[tokio::test]
    async fn test_attach_payment_stores_intent() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let db = Mutex::new(conn);

        let payment = attach_payment(&db, &FixedGateway(Some("pi_77")), &booking.id, PaymentMethod::Card, 4500)
            .await
            .unwrap();
        assert_eq!(payment.provider_intent_id.as_deref(), Some("pi_77"));

        let stored = queries::get_payment(&db.lock().unwrap(), &payment.id).unwrap().unwrap();
        assert_eq!(stored.provider_intent_id.as_deref(), Some("pi_77"));
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_gateway_failure_frees_the_attempt() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let db = Mutex::new(conn);

        let err = attach_payment(&db, &FixedGateway(None), &booking.id, PaymentMethod::Card, 4500)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Provider(_)));

        let retry = attach_payment(&db, &FixedGateway(Some("pi_2")), &booking.id, PaymentMethod::Card, 4500).await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_worker_applies_commands() {
        let mut conn = setup_db();
        let booking = book(&mut conn, ConfirmationPolicy::AwaitPayment);
        let payment = open_payment(&mut conn, &booking.id, PaymentMethod::Card, 4500, Utc::now()).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let ledger = LedgerHandle::spawn(Arc::clone(&db));

        let (paid, _) = ledger.succeeded(&payment.id, "pi_1").await.unwrap();
        assert_eq!(paid.status, PaymentStatus::Succeeded);

        let err = ledger.failed(&payment.id).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));

        let missing = ledger.failed("nope").await.unwrap_err();
        assert!(matches!(missing, BookingError::NotFound(_)));
    }
}
