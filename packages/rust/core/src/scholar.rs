//! Scholar search crawl: each task is a query, each query fetches a few
//! result pages, items come out of a generated extraction schema and the
//! first page's "Related searches" become follow-up queries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use paperpipe_crawler::{
    CrawlHandler, CrawlTask, DocumentSource, TaskOutput, extract_related_searches, query_param,
};
use paperpipe_shared::{CrawlConfig, PaperpipeError, Result};

use crate::schema::SchemaGenerator;

/// Results listed on one search page.
const RESULTS_PER_PAGE: u32 = 10;

pub struct ScholarHandler {
    source: Arc<dyn DocumentSource>,
    schemas: Arc<SchemaGenerator>,
    base_url: String,
    pages_per_query: u32,
    max_depth: u32,
    year: i32,
}

impl ScholarHandler {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        schemas: Arc<SchemaGenerator>,
        config: &CrawlConfig,
    ) -> Self {
        Self {
            source,
            schemas,
            base_url: config.base_search_url.clone(),
            pages_per_query: config.pages_per_query.max(1),
            max_depth: config.max_depth,
            year: Utc::now().year(),
        }
    }

    /// Lower bound for the year filter put on related-search links.
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    /// Result page `page` (0-based) for `query`.
    pub fn page_url(&self, query: &str, page: u32) -> Result<String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            PaperpipeError::config(format!("invalid search URL {}: {e}", self.base_url))
        })?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "q" && k != "start")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("q", query)
            .append_pair("start", &(page * RESULTS_PER_PAGE).to_string());
        Ok(url.into())
    }
}

/// Resolve a relative `url` field against the page it came from.
fn absolutize(item: &mut Value, page: &Url) {
    let Some(Value::String(href)) = item.get_mut("url") else {
        return;
    };
    if Url::parse(href).is_err() {
        if let Ok(joined) = page.join(href) {
            *href = joined.into();
        }
    }
}

#[async_trait]
impl CrawlHandler for ScholarHandler {
    #[instrument(skip(self), fields(query = %task.locator, depth = task.depth))]
    async fn process(&self, task: &CrawlTask) -> Result<TaskOutput> {
        let mut output = TaskOutput::default();

        for page in 0..self.pages_per_query {
            let url = self.page_url(&task.locator, page)?;
            let doc = match self.source.fetch(&url).await {
                Ok(doc) => doc,
                // Later pages are optional; the first one decides the task.
                Err(e) if page > 0 => {
                    warn!(%url, error = %e, "result page skipped");
                    break;
                }
                Err(e) => return Err(e),
            };

            let schema = self.schemas.schema_for(&url, Some(&doc.html)).await?;
            let mut items = schema.apply(&doc.html)?;
            if let Ok(page_url) = Url::parse(&doc.url) {
                items.iter_mut().for_each(|item| absolutize(item, &page_url));
            }
            debug!(%url, items = items.len(), "page extracted");
            output.items.extend(items);

            if page == 0 && task.depth < self.max_depth {
                output.expansions = extract_related_searches(&doc.markdown, &doc.url, self.year)
                    .iter()
                    .filter_map(|link| query_param(link, "q"))
                    .collect();
            }
        }

        Ok(output)
    }
}
