use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::Notifier;

/// Posts `{"user_id", "message"}` to the notification service.
pub struct HttpNotifier {
    url: String,
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, user_id: &str, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&json!({ "user_id": user_id, "message": message }))
            .send()
            .await
            .context("failed to reach notification service")?
            .error_for_status()
            .context("notification service returned error")?;

        Ok(())
    }
}
