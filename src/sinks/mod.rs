pub mod slack;

use anyhow::Result;
use async_trait::async_trait;

pub use slack::SlackWebhook;

/// Delivers a text message to a webhook URL configured in `prchecklist.yml`.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn post(&self, webhook_url: &str, text: &str) -> Result<()>;
}
