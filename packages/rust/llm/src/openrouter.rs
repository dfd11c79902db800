//! OpenRouter chat-completions client.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use paperpipe_shared::{OpenRouterConfig, PaperpipeError, Result};

use crate::provider::{GenerationError, TextGenerator};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connection settings for [`OpenRouterClient`].
#[derive(Debug, Clone)]
pub struct OpenRouterOptions {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenRouterOptions {
    /// Build options from the `[openrouter]` config section and a resolved key.
    pub fn from_config(config: &OpenRouterConfig, api_key: String) -> Self {
        Self {
            api_key,
            model: config.default_model.clone(),
            base_url: config.base_url.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct OpenRouterClient {
    client: Client,
    options: OpenRouterOptions,
}

impl OpenRouterClient {
    pub fn new(options: OpenRouterOptions) -> Result<Self> {
        if options.api_key.is_empty() {
            return Err(PaperpipeError::config("OpenRouter API key is empty"));
        }
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("paperpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PaperpipeError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, options })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.options.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.options.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.options.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.options.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        let header_delay = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_seconds);
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited {
                retry_after: header_delay.or_else(|| retry_delay_from_body(&body)),
            });
        }
        if !status.is_success() {
            return Err(GenerationError::Provider(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Provider(format!("unreadable response: {e}")))?;

        // Upstream errors are sometimes relayed inside a 200 body.
        if let Some(err) = parsed.error {
            let code = err.code.as_ref().and_then(serde_json::Value::as_u64);
            if code == Some(429) {
                return Err(GenerationError::RateLimited {
                    retry_after: retry_delay_from_body(&body),
                });
            }
            return Err(GenerationError::Provider(err.message));
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Provider("no choices in response".into()))?;

        debug!(len = content.len(), "generation complete");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.options.model
    }
}

/// `Retry-After` in delta-seconds form (fractions accepted). Values too
/// large for a `Duration` count as no delay.
fn parse_seconds(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Delay relayed in an upstream error body, e.g. Gemini's `"retryDelay": "17s"`
/// or a bare `"retry_after": 3`.
fn retry_delay_from_body(body: &str) -> Option<Duration> {
    static DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""(?:retryDelay|retry_after|retryAfter)"\s*:\s*"?([0-9]+(?:\.[0-9]+)?)s?"?"#)
            .expect("valid regex")
    });

    DELAY_RE
        .captures(body)
        .and_then(|c| parse_seconds(&c[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenRouterClient {
        OpenRouterClient::new(OpenRouterOptions {
            api_key: "test-key".into(),
            model: "test/model".into(),
            base_url: format!("{}/api/v1", server.uri()),
            temperature: 0.0,
            max_tokens: 64,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "[\"a\"]"}}]
            })))
            .mount(&server)
            .await;

        let text = client_for(&server).generate("hi").await.unwrap();
        assert_eq!(text, "[\"a\"]");
    }

    #[tokio::test]
    async fn oversized_retry_after_means_no_delay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e20"))
            .mount(&server)
            .await;

        let err = client_for(&server).generate("hi").await.unwrap_err();
        assert_eq!(err, GenerationError::RateLimited { retry_after: None });
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = client_for(&server).generate("hi").await.unwrap_err();
        assert_eq!(
            err,
            GenerationError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn rate_limit_reads_relayed_retry_delay() {
        let server = MockServer::start().await;
        let body = r#"{"error":{"code":429,"message":"quota","details":[{"retryDelay":"17s"}]}}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string(body))
            .mount(&server)
            .await;

        let err = client_for(&server).generate("hi").await.unwrap_err();
        assert_eq!(
            err,
            GenerationError::RateLimited {
                retry_after: Some(Duration::from_secs(17))
            }
        );
    }

    #[tokio::test]
    async fn rate_limit_without_delay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server).generate("hi").await.unwrap_err();
        assert_eq!(err, GenerationError::RateLimited { retry_after: None });
    }

    #[tokio::test]
    async fn server_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).generate("hi").await.unwrap_err();
        match err {
            GenerationError::Provider(msg) => assert!(msg.contains("boom")),
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relayed_error_in_ok_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "context too long"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate("hi").await.unwrap_err();
        assert_eq!(err, GenerationError::Provider("context too long".into()));
    }

    #[test]
    fn empty_key_is_config_error() {
        let result = OpenRouterClient::new(OpenRouterOptions {
            api_key: String::new(),
            model: "m".into(),
            base_url: "http://localhost".into(),
            temperature: 0.0,
            max_tokens: 1,
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(e) if e.is_fatal()));
    }

    #[test]
    fn delay_parsing() {
        assert_eq!(parse_seconds("0"), Some(Duration::ZERO));
        assert_eq!(parse_seconds("1.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_seconds("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_seconds("1e20"), None);
        assert_eq!(parse_seconds("-1"), None);
        assert_eq!(parse_seconds("NaN"), None);
        assert_eq!(
            retry_delay_from_body(r#"{"retryDelay": "99999999999999999999999s"}"#),
            None
        );
        assert_eq!(
            retry_delay_from_body(r#"{"retry_after": 3}"#),
            Some(Duration::from_secs(3))
        );
    }
}
