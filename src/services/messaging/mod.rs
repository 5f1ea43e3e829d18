pub mod http;

use async_trait::async_trait;

/// Fire-and-forget customer notifications. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, message: &str) -> anyhow::Result<()>;
}

/// Writes notifications to the log; used when `NOTIFY_URL` is unset.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, message: &str) -> anyhow::Result<()> {
        tracing::info!(user_id, message, "notification");
        Ok(())
    }
}
