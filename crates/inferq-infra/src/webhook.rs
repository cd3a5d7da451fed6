//! Best-effort webhook sink for failure events, configured via the
//! `webhook_url` setting.
//!
//! A small service wrapping a `reqwest::Client`, narrowed to a single
//! fire-and-forget POST per failure rather than a durable retry queue — this
//! sink is explicitly "best effort", not at-least-once.

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn send(&self, event: Value);
}

/// POSTs the JSON event to a configured URL, logging (not retrying) on failure.
pub struct ReqwestWebhookSink {
    client: reqwest::Client,
    url: String,
}

impl ReqwestWebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl WebhookSink for ReqwestWebhookSink {
    async fn send(&self, event: Value) {
        match self.client.post(&self.url).json(&event).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    status = %response.status(),
                    url = %self.url,
                    "webhook responded with non-success status"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.url, "webhook POST failed");
            }
            _ => {}
        }
    }
}

/// No-op sink used when no `webhook_url` is configured.
pub struct NoOpWebhookSink;

#[async_trait]
impl WebhookSink for NoOpWebhookSink {
    async fn send(&self, _event: Value) {}
}
