//! Chat webhook delivery
//!
//! Posts plain text alerts as `{"msg_type": "text", "content": {"text": ..}}`,
//! with a top-level `text` copy for Slack-style receivers.

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{AegisError, Result};

#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    msg_type: &'static str,
    content: WebhookContent<'a>,
    text: &'a str,
}

#[derive(Serialize)]
struct WebhookContent<'a> {
    text: &'a str,
}

impl WebhookNotifier {
    /// Build from `AEGIS_WEBHOOK_URL` if set
    pub fn from_env() -> Option<Arc<Self>> {
        std::env::var("AEGIS_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                info!("webhook notifications enabled");
                Self::new(url)
            })
    }

    pub fn new(webhook_url: String) -> Arc<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Arc::new(Self {
            client,
            webhook_url,
        })
    }

    pub async fn send_message(&self, text: &str) -> Result<()> {
        let message = WebhookMessage {
            msg_type: "text",
            content: WebhookContent { text },
            text,
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("webhook notification sent");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("webhook notification failed: {} - {}", status, body);
            Err(AegisError::Internal(format!("webhook HTTP {}: {}", status, body)))
        }
    }
}
