use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Failure classes a text-generation provider can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Provider refused the call; `retry_after` is the delay it asked for, if any.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The request never produced a provider response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other provider-side failure, with the provider's message.
    #[error("provider error: {0}")]
    Provider(String),
}

/// A service that turns a prompt into generated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}

#[async_trait]
impl TextGenerator for Arc<dyn TextGenerator> {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
