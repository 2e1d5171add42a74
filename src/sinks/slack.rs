use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::WebhookSink;

/// Slack incoming webhook, posted form-encoded as `payload={"text": ...}`.
#[derive(Clone)]
pub struct SlackWebhook {
    client: reqwest::Client,
}

impl SlackWebhook {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookSink for SlackWebhook {
    async fn post(&self, webhook_url: &str, text: &str) -> Result<()> {
        let payload = serde_json::to_string(&json!({ "text": text }))
            .context("failed to encode Slack payload")?;

        let response = self
            .client
            .post(webhook_url)
            .form(&[("payload", payload)])
            .send()
            .await
            .context("failed to post to Slack webhook")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack webhook returned {status}: {body}");
        }

        tracing::info!("Delivered message to Slack");
        Ok(())
    }
}
