use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::WebhookProvider;
use crate::services::webhook::{self, WebhookOutcome, SIGNATURE_HEADER};
use crate::state::AppState;

// POST /webhook/:provider
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let provider = WebhookProvider::parse(&provider)
        .ok_or_else(|| AppError::BadRequest(format!("unknown webhook provider: {provider}")))?;

    // An empty secret disables verification (local development).
    if !state.config.webhook_secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!(provider = provider.as_str(), "missing webhook signature header");
            return Err(AppError::InvalidSignature);
        }
        if !webhook::verify_signature(&state.config.webhook_secret, &body, signature) {
            tracing::warn!(provider = provider.as_str(), "invalid webhook signature");
            return Err(AppError::InvalidSignature);
        }
    }

    let outcome = webhook::handle_webhook(&state, provider, &body).await?;
    let status = match outcome {
        WebhookOutcome::Processed | WebhookOutcome::Replay => StatusCode::OK,
        // Logged as FAILED; the sweeper owns the retry.
        WebhookOutcome::Failed(_) => StatusCode::ACCEPTED,
    };

    Ok((status, Json(json!({ "status": outcome.as_str() }))))
}
