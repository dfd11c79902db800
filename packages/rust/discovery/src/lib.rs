//! Article discovery through the arXiv search API.
//!
//! A query is sent to the Atom endpoint (`search_query=all:<query>`) and the
//! returned feed is parsed into [`ArticleMetadata`]. Search is best-effort:
//! transport or feed errors are logged and yield an empty list so a pipeline
//! run can carry on.

mod atom;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument, warn};

use paperpipe_shared::{ArticleMetadata, PaperpipeError, Result, SearchConfig};

pub use atom::parse_feed;

/// Default timeout in seconds for search requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("paperpipe/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Search seam
// ---------------------------------------------------------------------------

/// A service that maps a free-text query to an ordered list of articles.
#[async_trait]
pub trait ArticleSearch: Send + Sync {
    async fn search(&self, query: &str) -> Vec<ArticleMetadata>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Result-count and ordering for a search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Atom query endpoint.
    pub base_url: String,
    pub max_results: u32,
    /// `relevance`, `lastUpdatedDate` or `submittedDate`.
    pub sort_by: String,
    /// `ascending` or `descending`.
    pub sort_order: String,
    pub timeout_secs: u64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            max_results: config.max_results,
            sort_by: config.sort_by.clone(),
            sort_order: config.sort_order.clone(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ArxivClient {
    client: Client,
    options: SearchOptions,
}

impl ArxivClient {
    pub fn new(options: SearchOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| PaperpipeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, options })
    }

    async fn fetch_feed(&self, query: &str) -> Result<String> {
        let url = &self.options.base_url;
        let response = self
            .client
            .get(url)
            .query(&[
                ("search_query", format!("all:{query}")),
                ("max_results", self.options.max_results.to_string()),
                ("sortBy", self.options.sort_by.clone()),
                ("sortOrder", self.options.sort_order.clone()),
            ])
            .send()
            .await
            .map_err(|e| PaperpipeError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaperpipeError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| PaperpipeError::Network(format!("{url}: failed to read body: {e}")))
    }
}

#[async_trait]
impl ArticleSearch for ArxivClient {
    #[instrument(skip(self), fields(max_results = self.options.max_results))]
    async fn search(&self, query: &str) -> Vec<ArticleMetadata> {
        let feed = match self.fetch_feed(query).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(error = %e, "search request failed");
                return Vec::new();
            }
        };

        match parse_feed(&feed) {
            Ok(articles) => {
                info!(count = articles.len(), "search complete");
                articles
            }
            Err(e) => {
                warn!(error = %e, "search feed unreadable");
                Vec::new()
            }
        }
    }
}
