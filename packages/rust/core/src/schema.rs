//! Generated CSS extraction schemas, cached per host.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use paperpipe_crawler::{DocumentSource, ExtractionSchema};
use paperpipe_llm::extract_object;
use paperpipe_shared::{PaperpipeError, Result};
use paperpipe_storage::SchemaCache;

use crate::stages::{Generation, truncate_chars};

/// Longest HTML excerpt sent with a schema prompt.
const MAX_HTML_CHARS: usize = 60_000;

/// Looks up a schema for a page's host in the cache, generating and caching
/// one from the page's HTML on a miss.
pub struct SchemaGenerator {
    cache: SchemaCache,
    source: Arc<dyn DocumentSource>,
    generation: Generation,
    prompt: String,
    /// Serializes lookups so concurrent misses for one host generate once.
    lock: Mutex<()>,
}

impl SchemaGenerator {
    pub fn new(
        cache: SchemaCache,
        source: Arc<dyn DocumentSource>,
        generation: Generation,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            source,
            generation,
            prompt: prompt.into(),
            lock: Mutex::new(()),
        }
    }

    /// Schema for `url`, from the cache when possible. `html` is used
    /// instead of fetching the page when the caller already has it.
    #[instrument(skip(self, html))]
    pub async fn schema_for(&self, url: &str, html: Option<&str>) -> Result<ExtractionSchema> {
        let _guard = self.lock.lock().await;

        if let Some(cached) = self.cache.lookup(url)? {
            return ExtractionSchema::from_value(cached);
        }

        let fetched;
        let html = match html {
            Some(html) => html,
            None => {
                fetched = self.source.fetch(url).await?;
                fetched.html.as_str()
            }
        };

        let prompt = format!("{}{}", self.prompt, truncate_chars(html, MAX_HTML_CHARS));
        let raw = self
            .generation
            .text("schema", &prompt)
            .await
            .map_err(|e| PaperpipeError::Llm(e.message))?;
        let object = extract_object(&raw).map_err(|e| PaperpipeError::parse(e.to_string()))?;
        let value = Value::Object(object);

        let schema = ExtractionSchema::from_value(value.clone())?;
        self.cache.append(url, &value)?;
        info!(name = %schema.name, fields = schema.fields.len(), "schema generated and cached");
        Ok(schema)
    }
}
