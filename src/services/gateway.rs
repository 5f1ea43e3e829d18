use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use crate::models::PaymentMethod;

/// Payment provider. Outcomes arrive later through the payments webhook.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, amount_cents: i64, method: PaymentMethod) -> anyhow::Result<String>;
}

pub struct HttpPaymentGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_intent(&self, amount_cents: i64, method: PaymentMethod) -> anyhow::Result<String> {
        let body = json!({
            "amount": amount_cents,
            "method": method.as_str(),
        });

        let resp = self
            .client
            .post(format!("{}/intents", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call payment gateway")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse payment gateway response")?;

        if !status.is_success() {
            anyhow::bail!("payment gateway error ({}): {}", status, data);
        }

        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing intent id in payment gateway response"))
    }
}

/// In-process gateway for development and desk payments: every intent is
/// accepted and settled by staff or a simulated webhook.
pub struct LocalPaymentGateway;

#[async_trait]
impl PaymentGateway for LocalPaymentGateway {
    async fn create_intent(&self, amount_cents: i64, method: PaymentMethod) -> anyhow::Result<String> {
        let intent = format!("local_{}", uuid::Uuid::new_v4().simple());
        tracing::info!(intent = %intent, amount_cents, method = method.as_str(), "created local payment intent");
        Ok(intent)
    }
}
