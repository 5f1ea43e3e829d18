//! Webhook intake.
//!
//! Every event is logged PENDING under `(provider, event id)` before it is
//! acted on. A PROCESSED entry short-circuits redelivery; a failure is kept
//! as FAILED for the sweeper to retry within `WEBHOOK_MAX_ATTEMPTS`.

use anyhow::Context;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::db::{self, queries};
use crate::errors::{AppError, BookingError};
use crate::models::slot::truncate_to_seconds;
use crate::models::{EventEnvelope, WebhookProvider, WebhookStatus};
use crate::services::{calendar, effects};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

const RETRY_BATCH: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    /// Already processed earlier; nothing was done.
    Replay,
    /// Handling failed; the entry is FAILED and will be retried.
    Failed(String),
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Replay => "replay",
            WebhookOutcome::Failed(_) => "failed",
        }
    }
}

/// base64(HMAC-SHA1(secret, body)).
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// The payload's own id, or the SHA-1 of the raw body when it has none.
pub fn event_key(envelope: &EventEnvelope, body: &[u8]) -> String {
    match envelope.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{:x}", Sha1::digest(body)),
    }
}

pub async fn handle_webhook(
    state: &AppState,
    provider: WebhookProvider,
    body: &[u8],
) -> Result<WebhookOutcome, AppError> {
    let envelope: EventEnvelope = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("malformed event: {e}")))?;
    let event_id = event_key(&envelope, body);
    let payload = String::from_utf8_lossy(body);

    let entry = {
        let conn = db::lock(&state.db);
        let now = truncate_to_seconds(Utc::now());
        queries::insert_webhook_log(&conn, provider, &event_id, &envelope.event_type, &payload, &now)
            .map_err(BookingError::from)?;
        queries::get_webhook_log(&conn, provider, &event_id)
            .map_err(BookingError::from)?
            .ok_or_else(|| BookingError::Storage(format!("webhook log entry vanished: {event_id}")))?
    };

    if entry.status == WebhookStatus::Processed {
        tracing::info!(
            provider = provider.as_str(),
            event_id = %event_id,
            event_type = %envelope.event_type,
            "webhook replay ignored"
        );
        return Ok(WebhookOutcome::Replay);
    }

    tracing::info!(
        provider = provider.as_str(),
        event_id = %event_id,
        event_type = %envelope.event_type,
        attempt = entry.attempts + 1,
        "processing webhook"
    );

    let result = process(state, provider, &envelope).await;
    Ok(settle(state, entry.id, &event_id, result)?)
}

fn settle(
    state: &AppState,
    log_id: i64,
    event_id: &str,
    result: anyhow::Result<()>,
) -> Result<WebhookOutcome, BookingError> {
    let conn = db::lock(&state.db);
    match result {
        Ok(()) => {
            queries::mark_webhook_processed(&conn, log_id, &truncate_to_seconds(Utc::now()))?;
            Ok(WebhookOutcome::Processed)
        }
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(event_id, error = %message, "webhook handling failed");
            queries::mark_webhook_failed(&conn, log_id, &message)?;
            Ok(WebhookOutcome::Failed(message))
        }
    }
}

#[derive(Deserialize)]
struct PaymentEventData {
    payment_id: String,
    intent_id: Option<String>,
}

#[derive(Deserialize)]
struct CalendarEventData {
    session_id: String,
}

async fn process(state: &AppState, provider: WebhookProvider, envelope: &EventEnvelope) -> anyhow::Result<()> {
    match (provider, envelope.event_type.as_str()) {
        (WebhookProvider::Payments, "payment.succeeded") => {
            let data: PaymentEventData =
                serde_json::from_value(envelope.data.clone()).context("invalid payment event data")?;
            let intent_id = data.intent_id.context("payment.succeeded without intent_id")?;
            let (_, effects) = state.ledger.succeeded(&data.payment_id, &intent_id).await?;
            effects::dispatch(state, effects).await;
        }
        (WebhookProvider::Payments, "payment.failed") => {
            let data: PaymentEventData =
                serde_json::from_value(envelope.data.clone()).context("invalid payment event data")?;
            let (_, effects) = state.ledger.failed(&data.payment_id).await?;
            effects::dispatch(state, effects).await;
        }
        (WebhookProvider::Calendar, "event.acknowledged") => {
            let data: CalendarEventData =
                serde_json::from_value(envelope.data.clone()).context("invalid calendar event data")?;
            let conn = db::lock(&state.db);
            calendar::acknowledge(&conn, &data.session_id, Utc::now())?;
        }
        (WebhookProvider::Calendar, "event.deleted") => {
            let data: CalendarEventData =
                serde_json::from_value(envelope.data.clone()).context("invalid calendar event data")?;
            let conn = db::lock(&state.db);
            calendar::provider_deleted(&conn, &data.session_id, Utc::now())?;
        }
        (provider, other) => {
            tracing::debug!(provider = provider.as_str(), event_type = other, "ignoring unhandled event type");
        }
    }
    Ok(())
}

/// Re-runs FAILED entries that still have attempts left. Returns how many
/// were processed successfully.
pub async fn retry_failed(state: &AppState) -> Result<usize, BookingError> {
    let entries = {
        let conn = db::lock(&state.db);
        queries::list_retryable_webhooks(&conn, state.config.webhook_max_attempts, RETRY_BATCH)?
    };

    let mut recovered = 0;
    for entry in entries {
        let result = match serde_json::from_str::<EventEnvelope>(&entry.payload) {
            Ok(envelope) => process(state, entry.provider, &envelope).await,
            Err(e) => Err(anyhow::Error::new(e).context("stored payload no longer parses")),
        };
        if settle(state, entry.id, &entry.event_id, result)? == WebhookOutcome::Processed {
            tracing::info!(event_id = %entry.event_id, attempts = entry.attempts + 1, "webhook retry succeeded");
            recovered += 1;
        }
    }
    Ok(recovered)
}
