use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::services::calendar::CalendarProvider;
use crate::services::effects::BookingEvent;
use crate::services::gateway::PaymentGateway;
use crate::services::messaging::Notifier;
use crate::services::payments::LedgerHandle;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub gateway: Box<dyn PaymentGateway>,
    pub calendar: Box<dyn CalendarProvider>,
    pub notifier: Box<dyn Notifier>,
    pub ledger: LedgerHandle,
    pub events_tx: broadcast::Sender<BookingEvent>,
}

impl AppState {
    /// Must be called inside a tokio runtime: it spawns the ledger worker.
    pub fn new(
        conn: Connection,
        config: AppConfig,
        gateway: Box<dyn PaymentGateway>,
        calendar: Box<dyn CalendarProvider>,
        notifier: Box<dyn Notifier>,
    ) -> Arc<Self> {
        let db = Arc::new(Mutex::new(conn));
        let ledger = LedgerHandle::spawn(Arc::clone(&db));
        let (events_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            db,
            config,
            gateway,
            calendar,
            notifier,
            ledger,
            events_tx,
        })
    }
}
