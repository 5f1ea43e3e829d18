use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::CalendarProvider;
use crate::models::{Booking, CalendarKind};

/// Calendar bridge speaking a small REST contract:
/// `POST {base}/events` returns `{"id": ..}`, `DELETE {base}/events/{id}`.
pub struct HttpCalendarProvider {
    kind: CalendarKind,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpCalendarProvider {
    pub fn new(kind: CalendarKind, base_url: String, api_key: String) -> Self {
        Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CalendarProvider for HttpCalendarProvider {
    fn kind(&self) -> CalendarKind {
        self.kind
    }

    async fn create_event(&self, booking: &Booking) -> anyhow::Result<String> {
        let body = json!({
            "provider": self.kind.as_str(),
            "external_ref": booking.id,
            "start": booking.start_at.to_rfc3339(),
            "end": booking.end_at.to_rfc3339(),
            "attendee": booking.customer_id,
            "stylist": booking.stylist_id,
        });

        let resp = self
            .client
            .post(format!("{}/events", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call calendar API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse calendar API response")?;

        if !status.is_success() {
            anyhow::bail!("calendar API error ({}): {}", status, data);
        }

        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing event id in calendar API response"))
    }

    async fn delete_event(&self, session_id: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .delete(format!("{}/events/{}", self.base_url, session_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to call calendar API")?;

        // Already gone on the provider side counts as deleted.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status().context("calendar API returned error")?;
        Ok(())
    }
}

/// Used when no calendar API is configured; bookings are still exported as `.ics`.
pub struct IcsOnlyCalendar;

#[async_trait]
impl CalendarProvider for IcsOnlyCalendar {
    fn kind(&self) -> CalendarKind {
        CalendarKind::Ical
    }

    async fn create_event(&self, booking: &Booking) -> anyhow::Result<String> {
        Ok(format!("{}@salonbook", booking.id))
    }

    async fn delete_event(&self, _session_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
