//! Rate-limit-aware invocation of a [`TextGenerator`].
//!
//! Only rate-limit errors are retried, and only after sleeping exactly the
//! delay the provider asked for. There is no blind backoff.

use tracing::{instrument, warn};

use paperpipe_shared::{PaperpipeError, StageErrorKind};

use crate::provider::{GenerationError, TextGenerator};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// Still rate limited after the retry budget was spent.
    #[error("rate limit persisted after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    /// Rate limited without a machine-readable retry delay.
    #[error("rate limited but the provider gave no retry delay")]
    RetryDelayUnavailable,

    #[error("transport error: {0}")]
    Transport(String),

    /// Non-retryable provider error, carrying the original message.
    #[error("provider error: {0}")]
    Provider(String),
}

impl InvokeError {
    /// How a stage should classify this failure in the record's error list.
    pub fn stage_kind(&self) -> StageErrorKind {
        match self {
            Self::ExhaustedRetries { .. } => StageErrorKind::ExhaustedRetries,
            Self::RetryDelayUnavailable => StageErrorKind::RateLimited,
            Self::Transport(_) => StageErrorKind::Transport,
            Self::Provider(_) => StageErrorKind::Provider,
        }
    }
}

impl From<InvokeError> for PaperpipeError {
    fn from(err: InvokeError) -> Self {
        PaperpipeError::Llm(err.to_string())
    }
}

/// Call `provider` with `prompt`, retrying rate-limited calls at most
/// `max_retries` times (so at most `max_retries + 1` attempts).
#[instrument(skip_all, fields(model = provider.model_name(), max_retries = max_retries))]
pub async fn invoke_with_retry<P>(
    provider: &P,
    prompt: &str,
    max_retries: u32,
) -> Result<String, InvokeError>
where
    P: TextGenerator + ?Sized,
{
    let mut retries = 0;
    loop {
        match provider.generate(prompt).await {
            Ok(text) => return Ok(text),
            Err(GenerationError::RateLimited { retry_after }) => {
                let Some(delay) = retry_after else {
                    return Err(InvokeError::RetryDelayUnavailable);
                };
                if retries >= max_retries {
                    return Err(InvokeError::ExhaustedRetries {
                        attempts: retries + 1,
                    });
                }
                retries += 1;
                warn!(delay_ms = delay.as_millis() as u64, retry = retries, "rate limited, waiting");
                tokio::time::sleep(delay).await;
            }
            Err(GenerationError::Transport(msg)) => return Err(InvokeError::Transport(msg)),
            Err(GenerationError::Provider(msg)) => return Err(InvokeError::Provider(msg)),
        }
    }
}
