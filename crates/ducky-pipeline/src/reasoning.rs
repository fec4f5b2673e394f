use std::time::Duration;

use async_trait::async_trait;
use ducky_core::{
    ContextBundle, DuckyError, ReasoningClient, ReasoningConfig, Result, ReviewResponse,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

const API_VERSION: &str = "2023-06-01";

/// Default instructions handed to the reasoning collaborator along with each
/// context bundle.
pub const DEFAULT_INSTRUCTIONS: &str = "You are Ducky, a quiet code-review companion \
watching a developer's codebase. You are shown one settled change to a code entity \
together with related code. Decide whether the change deserves a short piece of \
feedback: a style issue, a correctness smell, an inconsistency with related code, \
or technical debt. Most changes are fine and deserve silence; only speak up when \
the observation is concrete and actionable. Respond with JSON only, no prose: \
{\"should_notify\": bool, \"message\": string or null, \"tag\": one of \
\"style\" | \"correctness\" | \"consistency\" | \"debt\" or null}. \
Keep the message under two sentences and address the developer directly.";

/// Reasoning collaborator over the Anthropic messages API. Transport errors
/// and timeouts retry once with backoff and then surface as
/// `ReasoningUnavailable`; malformed model output fails closed to
/// `should_notify: false`.
pub struct HttpReasoningClient {
    client: Client,
    config: ReasoningConfig,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    system: &'a str,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl HttpReasoningClient {
    pub fn new(config: ReasoningConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn try_request(&self, system: &str, prompt: String) -> Result<String> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_output_tokens,
            system,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout_secs),
            self.client
                .post(format!(
                    "{}/v1/messages",
                    self.config.base_url.trim_end_matches('/')
                ))
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| {
            DuckyError::ReasoningUnavailable(format!(
                "timeout after {}s",
                self.config.timeout_secs
            ))
        })?
        .map_err(|e| DuckyError::ReasoningUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DuckyError::ReasoningUnavailable(format!(
                "reasoning API returned {}",
                response.status()
            )));
        }

        let data: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DuckyError::ReasoningUnavailable(format!("unreadable response: {}", e)))?;

        Ok(data
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn review(&self, bundle: &ContextBundle, instructions: &str) -> Result<ReviewResponse> {
        let prompt = render_bundle(bundle);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                debug!(attempt, "retrying reasoning request");
            }
            match self.try_request(instructions, prompt.clone()).await {
                Ok(raw) => {
                    // Malformed output is not transient; fail closed instead
                    // of burning another call.
                    return match parse_review(&raw) {
                        Ok(response) => Ok(response),
                        Err(e) => {
                            warn!(error = %e, "malformed reasoning response; failing closed");
                            Ok(ReviewResponse::suppress())
                        }
                    };
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reasoning request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| DuckyError::ReasoningUnavailable("no attempts made".to_string())))
    }
}

/// Render a context bundle into the prompt body.
pub fn render_bundle(bundle: &ContextBundle) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "File: {} ({})\nEntity: {} [{}] in module {}\nChange: {}\n",
        bundle.summary.path,
        bundle.summary.language,
        bundle.entity.qualified_name(),
        bundle.summary.kind,
        bundle.summary.module,
        bundle.change,
    ));
    out.push_str("\n--- Before ---\n");
    out.push_str(bundle.before.as_deref().unwrap_or("(entity did not exist)"));
    out.push_str("\n--- After ---\n");
    out.push_str(bundle.after.as_deref().unwrap_or("(entity was removed)"));
    if !bundle.related.is_empty() {
        out.push_str("\n--- Related code ---\n");
        for related in &bundle.related {
            out.push_str(&format!(
                "* {} [{}] at graph distance {}\n{}\n",
                related.id, related.kind, related.distance, related.text
            ));
        }
    }
    out
}

/// Parse the collaborator's JSON verdict out of its reply, tolerating prose
/// or code fences around the object. Anything that does not yield a boolean
/// `should_notify` (with a message when it is true) is malformed.
pub fn parse_review(raw: &str) -> Result<ReviewResponse> {
    #[derive(Deserialize)]
    struct RawReview {
        #[serde(alias = "shouldNotify")]
        should_notify: Option<bool>,
        message: Option<String>,
        tag: Option<String>,
    }

    let start = raw
        .find('{')
        .ok_or_else(|| DuckyError::MalformedResponse("no JSON object found".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| DuckyError::MalformedResponse("unterminated JSON object".to_string()))?;
    if end < start {
        return Err(DuckyError::MalformedResponse(
            "unterminated JSON object".to_string(),
        ));
    }

    let parsed: RawReview = serde_json::from_str(&raw[start..=end])
        .map_err(|e| DuckyError::MalformedResponse(e.to_string()))?;

    let should_notify = parsed
        .should_notify
        .ok_or_else(|| DuckyError::MalformedResponse("missing should_notify".to_string()))?;
    if should_notify && parsed.message.as_deref().map_or(true, |m| m.trim().is_empty()) {
        return Err(DuckyError::MalformedResponse(
            "should_notify without a message".to_string(),
        ));
    }

    Ok(ReviewResponse {
        should_notify,
        message: parsed.message,
        tag: parsed.tag.and_then(|t| t.parse().ok()),
    })
}
