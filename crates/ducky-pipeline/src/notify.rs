use std::sync::Arc;

use async_trait::async_trait;
use ducky_core::{DuckyError, FeedbackConfig, FeedbackTag, Notifier, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

/// Fallback notification surface: feedback lands in the log stream.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str, tag: Option<FeedbackTag>) -> Result<()> {
        match tag {
            Some(tag) => info!(target: "ducky::feedback", %tag, "{}", text),
            None => info!(target: "ducky::feedback", "{}", text),
        }
        Ok(())
    }
}

/// Posts feedback to a local notification service (voice synthesis, desktop
/// toast, whatever is listening).
pub struct HttpNotifier {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct NotifyPayload<'a> {
    text: &'a str,
    tag: Option<String>,
}

impl HttpNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, text: &str, tag: Option<FeedbackTag>) -> Result<()> {
        let payload = NotifyPayload {
            text,
            tag: tag.map(|t| t.to_string()),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DuckyError::InvalidOperation(format!("notification failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(DuckyError::InvalidOperation(format!(
                "notification service returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

pub fn notifier_from_config(config: &FeedbackConfig) -> Arc<dyn Notifier> {
    match &config.notify_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    }
}
