//! Shared fixtures for the service unit tests.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use rusqlite::Connection;

use crate::config::{AppConfig, ConfirmationPolicy};
use crate::db::{self, queries};
use crate::models::slot::truncate_to_seconds;
use crate::models::{Booking, BookingStatus, Branch, Service, Slot, Stylist};
use crate::services::calendar::http::IcsOnlyCalendar;
use crate::services::gateway::LocalPaymentGateway;
use crate::services::messaging::LogNotifier;
use crate::state::AppState;

pub struct Catalog {
    pub branch: String,
    pub other_branch: String,
    pub haircut: String,
    pub colour: String,
    pub stylist_a: String,
    pub stylist_b: String,
    pub stylist_elsewhere: String,
}

pub fn setup_db() -> Connection {
    db::init_db(":memory:").unwrap()
}

/// 2025-06-16 (a Monday) at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 16, h, m, 0).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// One branch open 09:00-18:00 UTC with two stylists, plus a second branch.
pub fn catalog(conn: &Connection) -> Catalog {
    let branch = Branch::new("br-main", "Main Street", hm(9, 0), hm(18, 0), 0).unwrap();
    let other = Branch::new("br-other", "Harbour", hm(10, 0), hm(16, 0), 0).unwrap();
    queries::insert_branch(conn, &branch).unwrap();
    queries::insert_branch(conn, &other).unwrap();

    for (id, name, minutes, price) in [("svc-cut", "Haircut", 60, 4500), ("svc-colour", "Colour", 90, 9000)] {
        queries::insert_service(
            conn,
            &Service {
                id: id.into(),
                branch_id: branch.id.clone(),
                name: name.into(),
                duration_minutes: minutes,
                price_cents: price,
            },
        )
        .unwrap();
    }

    for (id, branch_id, name) in [
        ("sty-a", &branch.id, "Ana"),
        ("sty-b", &branch.id, "Bea"),
        ("sty-x", &other.id, "Xavi"),
    ] {
        queries::insert_stylist(
            conn,
            &Stylist {
                id: id.into(),
                branch_id: branch_id.clone(),
                name: name.into(),
            },
        )
        .unwrap();
    }

    Catalog {
        branch: branch.id,
        other_branch: other.id,
        haircut: "svc-cut".into(),
        colour: "svc-colour".into(),
        stylist_a: "sty-a".into(),
        stylist_b: "sty-b".into(),
        stylist_elsewhere: "sty-x".into(),
    }
}

/// Inserts a PENDING haircut booking row without reserving its slot.
pub fn seed_booking_row(conn: &Connection, id: &str, cat: &Catalog, stylist: Option<&String>, slot: Slot) {
    let now = Utc::now();
    queries::insert_booking(
        conn,
        &Booking {
            id: id.into(),
            branch_id: cat.branch.clone(),
            stylist_id: stylist.cloned(),
            service_id: cat.haircut.clone(),
            customer_id: Some("cust-1".into()),
            start_at: slot.start,
            end_at: slot.end,
            duration_minutes: slot.duration_minutes(),
            total_price_cents: 4500,
            status: BookingStatus::Pending,
            cancel_reason: None,
            created_at: truncate_to_seconds(now),
            updated_at: truncate_to_seconds(now),
        },
    )
    .unwrap();
}

pub fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".into(),
        admin_token: "test-token".into(),
        confirmation_policy: ConfirmationPolicy::AwaitPayment,
        pending_timeout_minutes: 15,
        sweep_interval_secs: 30,
        webhook_secret: String::new(),
        webhook_max_attempts: 3,
        payment_gateway_url: String::new(),
        payment_gateway_key: String::new(),
        calendar_provider: "ical".into(),
        calendar_api_url: String::new(),
        calendar_api_key: String::new(),
        notify_url: String::new(),
    }
}

/// State with in-process providers. Needs a tokio runtime.
pub fn test_state(conn: Connection) -> Arc<AppState> {
    AppState::new(
        conn,
        test_config(),
        Box::new(LocalPaymentGateway),
        Box::new(IcsOnlyCalendar),
        Box::new(LogNotifier),
    )
}
