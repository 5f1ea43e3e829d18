use tracing_subscriber::EnvFilter;

use salonbook::config::AppConfig;
use salonbook::db;
use salonbook::handlers;
use salonbook::models::CalendarKind;
use salonbook::services::calendar::http::{HttpCalendarProvider, IcsOnlyCalendar};
use salonbook::services::calendar::CalendarProvider;
use salonbook::services::gateway::{HttpPaymentGateway, LocalPaymentGateway, PaymentGateway};
use salonbook::services::messaging::http::HttpNotifier;
use salonbook::services::messaging::{LogNotifier, Notifier};
use salonbook::services::sweeper;
use salonbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let gateway: Box<dyn PaymentGateway> = if config.payment_gateway_url.is_empty() {
        tracing::warn!("PAYMENT_GATEWAY_URL not set, using local payment intents");
        Box::new(LocalPaymentGateway)
    } else {
        anyhow::ensure!(
            !config.payment_gateway_key.is_empty(),
            "PAYMENT_GATEWAY_KEY must be set when PAYMENT_GATEWAY_URL is"
        );
        tracing::info!("using payment gateway at {}", config.payment_gateway_url);
        Box::new(HttpPaymentGateway::new(
            config.payment_gateway_url.clone(),
            config.payment_gateway_key.clone(),
        ))
    };

    let calendar: Box<dyn CalendarProvider> = match CalendarKind::parse(&config.calendar_provider) {
        Some(CalendarKind::Ical) | None => {
            tracing::info!("calendar sync disabled, serving .ics downloads only");
            Box::new(IcsOnlyCalendar)
        }
        Some(kind) if config.calendar_api_url.is_empty() => {
            tracing::warn!(provider = kind.as_str(), "CALENDAR_API_URL not set, serving .ics downloads only");
            Box::new(IcsOnlyCalendar)
        }
        Some(kind) => {
            tracing::info!(provider = kind.as_str(), "using calendar bridge at {}", config.calendar_api_url);
            Box::new(HttpCalendarProvider::new(
                kind,
                config.calendar_api_url.clone(),
                config.calendar_api_key.clone(),
            ))
        }
    };

    let notifier: Box<dyn Notifier> = if config.notify_url.is_empty() {
        Box::new(LogNotifier)
    } else {
        Box::new(HttpNotifier::new(config.notify_url.clone()))
    };

    let state = AppState::new(conn, config.clone(), gateway, calendar, notifier);

    tokio::spawn(sweeper::run_sweeper(state.clone()));

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
