use std::env;
use std::time::Duration;

/// Whether a new booking is confirmed on the spot or held PENDING until its
/// payment succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    Immediate,
    AwaitPayment,
}

impl ConfirmationPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Some(ConfirmationPolicy::Immediate),
            "await_payment" => Some(ConfirmationPolicy::AwaitPayment),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub confirmation_policy: ConfirmationPolicy,
    pub pending_timeout_minutes: i64,
    pub sweep_interval_secs: u64,
    pub webhook_secret: String,
    pub webhook_max_attempts: i64,
    pub payment_gateway_url: String,
    pub payment_gateway_key: String,
    pub calendar_provider: String,
    pub calendar_api_url: String,
    pub calendar_api_key: String,
    pub notify_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "salonbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            confirmation_policy: env::var("BOOKING_CONFIRMATION_POLICY")
                .ok()
                .and_then(|v| ConfirmationPolicy::parse(&v))
                .unwrap_or(ConfirmationPolicy::AwaitPayment),
            pending_timeout_minutes: env::var("PENDING_TIMEOUT_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            webhook_secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            webhook_max_attempts: env::var("WEBHOOK_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL").unwrap_or_default(),
            payment_gateway_key: env::var("PAYMENT_GATEWAY_KEY").unwrap_or_default(),
            calendar_provider: env::var("CALENDAR_PROVIDER").unwrap_or_else(|_| "google".to_string()),
            calendar_api_url: env::var("CALENDAR_API_URL").unwrap_or_default(),
            calendar_api_key: env::var("CALENDAR_API_KEY").unwrap_or_default(),
            notify_url: env::var("NOTIFY_URL").unwrap_or_default(),
        }
    }

    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_timeout_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parsing() {
        assert_eq!(ConfirmationPolicy::parse("immediate"), Some(ConfirmationPolicy::Immediate));
        assert_eq!(ConfirmationPolicy::parse(" AWAIT_PAYMENT "), Some(ConfirmationPolicy::AwaitPayment));
        assert_eq!(ConfirmationPolicy::parse("sometimes"), None);
    }
}
