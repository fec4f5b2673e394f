use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ContextBundle, FeedbackTag, ReviewResponse};

/// Embedding collaborator: text in, fixed-dimension vector out.
///
/// Implementations own their transport, timeout and retry policy and fail
/// with `EmbeddingUnavailable`; callers degrade rather than block.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Reasoning collaborator: judges whether a change warrants feedback.
///
/// Malformed model output must be mapped to the fail-closed
/// `ReviewResponse::suppress()` by the implementation, never surfaced.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn review(&self, bundle: &ContextBundle, instructions: &str) -> Result<ReviewResponse>;
}

/// Notification surface. Failures are logged by callers and never roll back
/// an already-persisted feedback decision.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str, tag: Option<FeedbackTag>) -> Result<()>;
}
