//! Text-generation plumbing: the [`TextGenerator`] seam, an OpenRouter
//! chat-completions client, rate-limit-aware retries, and repair/extraction of
//! JSON fragments in generated text.

pub mod json;
pub mod openrouter;
pub mod provider;
pub mod retry;

pub use json::{MalformedResponse, extract_list, extract_object, repair_json};
pub use openrouter::{OpenRouterClient, OpenRouterOptions};
pub use provider::{GenerationError, TextGenerator};
pub use retry::{InvokeError, invoke_with_retry};
