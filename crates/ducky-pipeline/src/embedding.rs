use std::time::Duration;

use async_trait::async_trait;
use ducky_core::{DuckyError, EmbeddingClient, EmbeddingConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

/// HTTP embedding collaborator speaking the Ollama `/api/embed` contract.
/// Failures and timeouts surface as `EmbeddingUnavailable`; one retry with
/// backoff, then the caller degrades.
pub struct HttpEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn try_embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: vec![text],
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout_secs),
            self.client
                .post(format!(
                    "{}/api/embed",
                    self.config.base_url.trim_end_matches('/')
                ))
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| {
            DuckyError::EmbeddingUnavailable(format!(
                "timeout after {}s",
                self.config.timeout_secs
            ))
        })?
        .map_err(|e| DuckyError::EmbeddingUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DuckyError::EmbeddingUnavailable(format!(
                "embedding API returned {}",
                response.status()
            )));
        }

        let data: EmbedResponse = response
            .json()
            .await
            .map_err(|e| DuckyError::EmbeddingUnavailable(format!("unreadable response: {}", e)))?;

        let vector = data
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| DuckyError::EmbeddingUnavailable("empty response".to_string()))?;

        if vector.len() != self.config.dimension {
            return Err(DuckyError::EmbeddingUnavailable(format!(
                "expected {} dimensions, got {}",
                self.config.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(250 * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                debug!(attempt, "retrying embedding request");
            }
            match self.try_embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) => {
                    warn!(attempt, error = %e, "embedding request failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| DuckyError::EmbeddingUnavailable("no attempts made".to_string())))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_shape_matches_wire_contract() {
        let json = r#"{"embeddings": [[0.1, -0.2, 0.3]]}"#;
        let parsed: EmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.embeddings.len(), 1);
        assert_eq!(parsed.embeddings[0].len(), 3);
    }

    #[test]
    fn request_serializes_model_and_input() {
        let request = EmbedRequest {
            model: "nomic-embed-text",
            input: vec!["fn main() {}"],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "nomic-embed-text");
        assert_eq!(json["input"][0], "fn main() {}");
    }
}
