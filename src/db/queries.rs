use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::slot::{fmt_ts, parse_ts};
use crate::models::{
    Booking, BookingStatus, Branch, CalendarKind, ExternalSession, Payment, PaymentMethod,
    PaymentStatus, Service, SessionStatus, Slot, Stylist, WebhookLog, WebhookProvider,
    WebhookStatus,
};

const TIME_FORMAT: &str = "%H:%M:%S";

// ── Column helpers ──

fn invalid_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(&s).ok_or_else(|| invalid_column(idx, format!("bad timestamp: {s}")))
}

fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(s) => parse_ts(&s)
            .map(Some)
            .ok_or_else(|| invalid_column(idx, format!("bad timestamp: {s}"))),
        None => Ok(None),
    }
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let s: String = row.get(idx)?;
    NaiveTime::parse_from_str(&s, TIME_FORMAT)
        .map_err(|_| invalid_column(idx, format!("bad time of day: {s}")))
}

fn enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| invalid_column(idx, format!("unexpected value: {s}")))
}

// ── Catalog ──

pub fn insert_branch(conn: &Connection, branch: &Branch) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO branches (id, name, open_time, close_time, utc_offset_minutes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            branch.id,
            branch.name,
            branch.open_time.format(TIME_FORMAT).to_string(),
            branch.close_time.format(TIME_FORMAT).to_string(),
            branch.utc_offset_minutes,
        ],
    )?;
    Ok(())
}

pub fn get_branch(conn: &Connection, id: &str) -> rusqlite::Result<Option<Branch>> {
    conn.query_row(
        "SELECT id, name, open_time, close_time, utc_offset_minutes FROM branches WHERE id = ?1",
        params![id],
        |row| {
            Ok(Branch {
                id: row.get(0)?,
                name: row.get(1)?,
                open_time: time_col(row, 2)?,
                close_time: time_col(row, 3)?,
                utc_offset_minutes: row.get(4)?,
            })
        },
    )
    .optional()
}

pub fn insert_service(conn: &Connection, service: &Service) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO services (id, branch_id, name, duration_minutes, price_cents)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            service.id,
            service.branch_id,
            service.name,
            service.duration_minutes,
            service.price_cents,
        ],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> rusqlite::Result<Option<Service>> {
    conn.query_row(
        "SELECT id, branch_id, name, duration_minutes, price_cents FROM services WHERE id = ?1",
        params![id],
        |row| {
            Ok(Service {
                id: row.get(0)?,
                branch_id: row.get(1)?,
                name: row.get(2)?,
                duration_minutes: row.get(3)?,
                price_cents: row.get(4)?,
            })
        },
    )
    .optional()
}

pub fn insert_stylist(conn: &Connection, stylist: &Stylist) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO stylists (id, branch_id, name) VALUES (?1, ?2, ?3)",
        params![stylist.id, stylist.branch_id, stylist.name],
    )?;
    Ok(())
}

pub fn get_stylist(conn: &Connection, id: &str) -> rusqlite::Result<Option<Stylist>> {
    conn.query_row(
        "SELECT id, branch_id, name FROM stylists WHERE id = ?1",
        params![id],
        |row| {
            Ok(Stylist {
                id: row.get(0)?,
                branch_id: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )
    .optional()
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, branch_id, stylist_id, service_id, customer_id, start_at, end_at, \
     duration_minutes, total_price_cents, status, cancel_reason, created_at, updated_at";

fn parse_booking_row(row: &Row) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: row.get(0)?,
        branch_id: row.get(1)?,
        stylist_id: row.get(2)?,
        service_id: row.get(3)?,
        customer_id: row.get(4)?,
        start_at: ts_col(row, 5)?,
        end_at: ts_col(row, 6)?,
        duration_minutes: row.get(7)?,
        total_price_cents: row.get(8)?,
        status: enum_col(row, 9, BookingStatus::parse)?,
        cancel_reason: row.get(10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

pub fn insert_booking(conn: &Connection, booking: &Booking) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, branch_id, stylist_id, service_id, customer_id, start_at, end_at,
                               duration_minutes, total_price_cents, status, cancel_reason, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            booking.id,
            booking.branch_id,
            booking.stylist_id,
            booking.service_id,
            booking.customer_id,
            fmt_ts(&booking.start_at),
            fmt_ts(&booking.end_at),
            booking.duration_minutes,
            booking.total_price_cents,
            booking.status.as_str(),
            booking.cancel_reason,
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    )
    .optional()
}

pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    status: BookingStatus,
    cancel_reason: Option<&str>,
    now: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, cancel_reason = COALESCE(?2, cancel_reason), updated_at = ?3
         WHERE id = ?4",
        params![status.as_str(), cancel_reason, fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn update_booking_slot(
    conn: &Connection,
    id: &str,
    slot: &Slot,
    now: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET start_at = ?1, end_at = ?2, updated_at = ?3 WHERE id = ?4",
        params![fmt_ts(&slot.start), fmt_ts(&slot.end), fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

/// PENDING bookings created at or before `cutoff`.
pub fn list_stale_pending(conn: &Connection, cutoff: &DateTime<Utc>) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM bookings WHERE status = 'pending' AND created_at <= ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(params![fmt_ts(cutoff)], |row| row.get(0))?;
    rows.collect()
}

/// CONFIRMED bookings whose slot has ended by `now`.
pub fn list_due_for_completion(conn: &Connection, now: &DateTime<Utc>) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM bookings WHERE status = 'confirmed' AND end_at <= ?1 ORDER BY end_at ASC",
    )?;
    let rows = stmt.query_map(params![fmt_ts(now)], |row| row.get(0))?;
    rows.collect()
}

/// CONFIRMED bookings still ahead of `now` that never got a calendar session.
/// Bookings whose session was invalidated are left alone.
pub fn list_unsynced_confirmed(conn: &Connection, now: &DateTime<Utc>, limit: i64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT b.id FROM bookings b
         WHERE b.status = 'confirmed' AND b.end_at > ?1
           AND NOT EXISTS (SELECT 1 FROM external_sessions s WHERE s.booking_id = b.id)
         ORDER BY b.start_at ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![fmt_ts(now), limit], |row| row.get(0))?;
    rows.collect()
}

// ── Reservations ──

pub fn insert_reservation(
    conn: &Connection,
    booking_id: &str,
    branch_id: &str,
    stylist_id: Option<&str>,
    slot: &Slot,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO reservations (booking_id, branch_id, stylist_id, start_at, end_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            booking_id,
            branch_id,
            stylist_id,
            fmt_ts(&slot.start),
            fmt_ts(&slot.end)
        ],
    )?;
    Ok(())
}

pub fn update_reservation_slot(conn: &Connection, booking_id: &str, slot: &Slot) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET start_at = ?1, end_at = ?2 WHERE booking_id = ?3",
        params![fmt_ts(&slot.start), fmt_ts(&slot.end), booking_id],
    )?;
    Ok(count > 0)
}

pub fn delete_reservation(conn: &Connection, booking_id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "DELETE FROM reservations WHERE booking_id = ?1",
        params![booking_id],
    )?;
    Ok(count > 0)
}

pub fn get_reservation_slot(conn: &Connection, booking_id: &str) -> rusqlite::Result<Option<Slot>> {
    conn.query_row(
        "SELECT start_at, end_at FROM reservations WHERE booking_id = ?1",
        params![booking_id],
        |row| {
            Ok(Slot {
                start: ts_col(row, 0)?,
                end: ts_col(row, 1)?,
            })
        },
    )
    .optional()
}

/// Held slots for a stylist overlapping `window`, ordered by start.
pub fn list_reserved_slots(
    conn: &Connection,
    branch_id: &str,
    stylist_id: &str,
    window: &Slot,
) -> rusqlite::Result<Vec<Slot>> {
    let mut stmt = conn.prepare(
        "SELECT start_at, end_at FROM reservations
         WHERE branch_id = ?1 AND stylist_id = ?2 AND start_at < ?3 AND ?4 < end_at
         ORDER BY start_at ASC",
    )?;
    let rows = stmt.query_map(
        params![branch_id, stylist_id, fmt_ts(&window.end), fmt_ts(&window.start)],
        |row| {
            Ok(Slot {
                start: ts_col(row, 0)?,
                end: ts_col(row, 1)?,
            })
        },
    )?;
    rows.collect()
}

// ── Payments ──

const PAYMENT_COLUMNS: &str =
    "id, booking_id, method, status, amount_cents, provider_intent_id, created_at, updated_at";

fn parse_payment_row(row: &Row) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        method: enum_col(row, 2, PaymentMethod::parse)?,
        status: enum_col(row, 3, PaymentStatus::parse)?,
        amount_cents: row.get(4)?,
        provider_intent_id: row.get(5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}

pub fn insert_payment(conn: &Connection, payment: &Payment) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO payments (id, booking_id, method, status, amount_cents, provider_intent_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            payment.id,
            payment.booking_id,
            payment.method.as_str(),
            payment.status.as_str(),
            payment.amount_cents,
            payment.provider_intent_id,
            fmt_ts(&payment.created_at),
            fmt_ts(&payment.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, id: &str) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
        params![id],
        parse_payment_row,
    )
    .optional()
}

/// The single non-FAILED payment of a booking, if any.
pub fn get_active_payment(conn: &Connection, booking_id: &str) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = ?1 AND status != 'failed'"),
        params![booking_id],
        parse_payment_row,
    )
    .optional()
}

pub fn list_payments_for_booking(conn: &Connection, booking_id: &str) -> rusqlite::Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = ?1 ORDER BY created_at ASC"
    ))?;
    let rows = stmt.query_map(params![booking_id], parse_payment_row)?;
    rows.collect()
}

pub fn update_payment_status(
    conn: &Connection,
    id: &str,
    status: PaymentStatus,
    now: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn set_payment_intent(
    conn: &Connection,
    id: &str,
    intent_id: &str,
    now: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET provider_intent_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![intent_id, fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

// ── External sessions ──

const SESSION_COLUMNS: &str =
    "id, booking_id, provider, session_id, status, acknowledged_at, created_at, invalidated_at";

fn parse_session_row(row: &Row) -> rusqlite::Result<ExternalSession> {
    Ok(ExternalSession {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        provider: enum_col(row, 2, CalendarKind::parse)?,
        session_id: row.get(3)?,
        status: enum_col(row, 4, SessionStatus::parse)?,
        acknowledged_at: opt_ts_col(row, 5)?,
        created_at: ts_col(row, 6)?,
        invalidated_at: opt_ts_col(row, 7)?,
    })
}

/// Returns false when the booking already has an active session.
pub fn insert_session(conn: &Connection, session: &ExternalSession) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "INSERT INTO external_sessions (id, booking_id, provider, session_id, status, acknowledged_at, created_at, invalidated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT DO NOTHING",
        params![
            session.id,
            session.booking_id,
            session.provider.as_str(),
            session.session_id,
            session.status.as_str(),
            session.acknowledged_at.as_ref().map(fmt_ts),
            fmt_ts(&session.created_at),
            session.invalidated_at.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_active_session(conn: &Connection, booking_id: &str) -> rusqlite::Result<Option<ExternalSession>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM external_sessions WHERE booking_id = ?1 AND status = 'active'"),
        params![booking_id],
        parse_session_row,
    )
    .optional()
}

pub fn get_session_by_provider_id(
    conn: &Connection,
    session_id: &str,
) -> rusqlite::Result<Option<ExternalSession>> {
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM external_sessions WHERE session_id = ?1
             ORDER BY created_at DESC LIMIT 1"
        ),
        params![session_id],
        parse_session_row,
    )
    .optional()
}

pub fn invalidate_session(conn: &Connection, id: &str, now: &DateTime<Utc>) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE external_sessions SET status = 'invalidated', invalidated_at = ?1
         WHERE id = ?2 AND status = 'active'",
        params![fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn acknowledge_session(conn: &Connection, id: &str, now: &DateTime<Utc>) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE external_sessions SET acknowledged_at = ?1 WHERE id = ?2 AND acknowledged_at IS NULL",
        params![fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

// ── Webhook log ──

const WEBHOOK_COLUMNS: &str = "id, provider, event_id, event_type, payload, status, error_message, \
     attempts, received_at, processed_at";

fn parse_webhook_row(row: &Row) -> rusqlite::Result<WebhookLog> {
    Ok(WebhookLog {
        id: row.get(0)?,
        provider: enum_col(row, 1, WebhookProvider::parse)?,
        event_id: row.get(2)?,
        event_type: row.get(3)?,
        payload: row.get(4)?,
        status: enum_col(row, 5, WebhookStatus::parse)?,
        error_message: row.get(6)?,
        attempts: row.get(7)?,
        received_at: ts_col(row, 8)?,
        processed_at: opt_ts_col(row, 9)?,
    })
}

/// Records a new PENDING entry. Returns false if (provider, event_id) was already logged.
pub fn insert_webhook_log(
    conn: &Connection,
    provider: WebhookProvider,
    event_id: &str,
    event_type: &str,
    payload: &str,
    now: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "INSERT INTO webhook_logs (provider, event_id, event_type, payload, status, received_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
         ON CONFLICT(provider, event_id) DO NOTHING",
        params![provider.as_str(), event_id, event_type, payload, fmt_ts(now)],
    )?;
    Ok(count > 0)
}

pub fn get_webhook_log(
    conn: &Connection,
    provider: WebhookProvider,
    event_id: &str,
) -> rusqlite::Result<Option<WebhookLog>> {
    conn.query_row(
        &format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_logs WHERE provider = ?1 AND event_id = ?2"),
        params![provider.as_str(), event_id],
        parse_webhook_row,
    )
    .optional()
}

pub fn mark_webhook_processed(conn: &Connection, id: i64, now: &DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE webhook_logs SET status = 'processed', error_message = NULL,
                attempts = attempts + 1, processed_at = ?1
         WHERE id = ?2",
        params![fmt_ts(now), id],
    )?;
    Ok(())
}

pub fn mark_webhook_failed(conn: &Connection, id: i64, error: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE webhook_logs SET status = 'failed', error_message = ?1, attempts = attempts + 1
         WHERE id = ?2",
        params![error, id],
    )?;
    Ok(())
}

/// FAILED entries that still have retry budget, oldest first.
pub fn list_retryable_webhooks(
    conn: &Connection,
    max_attempts: i64,
    limit: i64,
) -> rusqlite::Result<Vec<WebhookLog>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhook_logs
         WHERE status = 'failed' AND attempts < ?1
         ORDER BY received_at ASC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![max_attempts, limit], parse_webhook_row)?;
    rows.collect()
}
