//! Document source: fetch a URL and hand back its HTML and Markdown.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

use paperpipe_shared::{CrawlConfig, PaperpipeError, Result};

use crate::throttle::OriginThrottle;

/// Browser-like user agents rotated across requests; search front-ends
/// refuse obvious bots.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A fetched document in both raw and converted form.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub html: String,
    pub markdown: String,
    pub title: String,
    /// SHA-256 of the raw body.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// Turns a locator into document text.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument>;
}

/// HTTP settings for [`HttpDocumentSource`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl From<&CrawlConfig> for FetchOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpDocumentSource
// ---------------------------------------------------------------------------

pub struct HttpDocumentSource {
    client: Client,
    throttle: OriginThrottle,
    /// Allow localhost/private IPs (local mirrors and mock servers).
    allow_private_hosts: bool,
}

impl HttpDocumentSource {
    pub fn new(options: FetchOptions) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(options.timeout)
            .build()
            .map_err(|e| PaperpipeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            throttle: OriginThrottle::new(options.min_delay, options.max_delay),
            allow_private_hosts: false,
        })
    }

    pub fn allow_private_hosts(mut self) -> Self {
        self.allow_private_hosts = true;
        self
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        let parsed = Url::parse(url)
            .map_err(|e| PaperpipeError::validation(format!("invalid URL {url}: {e}")))?;

        if !self.allow_private_hosts && is_ssrf_target(&parsed) {
            warn!(%url, "blocked private or non-http target");
            return Err(PaperpipeError::validation(format!(
                "refusing to fetch private or non-http URL: {url}"
            )));
        }

        self.throttle.acquire(&parsed).await;

        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let response = self
            .client
            .get(parsed.as_str())
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| PaperpipeError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaperpipeError::Network(format!("{url}: HTTP {status}")));
        }
        let final_url = response.url().to_string();

        let html = response
            .text()
            .await
            .map_err(|e| PaperpipeError::Network(format!("{url}: body read failed: {e}")))?;

        let converted = paperpipe_markdown::convert(&html, &final_url)?;
        debug!(
            %final_url,
            html_len = html.len(),
            markdown_len = converted.markdown.len(),
            "document fetched"
        );

        Ok(FetchedDocument {
            url: final_url,
            status: status.as_u16(),
            content_hash: compute_hash(&html),
            html,
            markdown: converted.markdown,
            title: converted.title,
            fetched_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Normalize a locator for deduplication: no fragment, no trailing slash
/// outside the root path. Unparsable input is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);
    if url.path().len() > 1 && url.path().ends_with('/') {
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }
    url.to_string()
}

/// Non-http schemes and private, loopback or link-local hosts.
fn is_ssrf_target(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }
    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 carrier-grade NAT
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(5),
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn normalize_strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://arxiv.org/abs/2401.00001/#S2"),
            "https://arxiv.org/abs/2401.00001"
        );
        assert_eq!(normalize_url("https://arxiv.org/"), "https://arxiv.org/");
        assert_eq!(normalize_url("  not a url "), "not a url");
    }

    #[test]
    fn ssrf_targets() {
        for blocked in [
            "file:///etc/passwd",
            "http://127.0.0.1:8080/",
            "http://10.0.0.1/",
            "http://192.168.1.1/admin",
            "http://localhost:3000/api",
            "http://[::1]/",
        ] {
            assert!(is_ssrf_target(&Url::parse(blocked).unwrap()), "{blocked}");
        }
        assert!(!is_ssrf_target(&Url::parse("https://arxiv.org/abs/1").unwrap()));
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            compute_hash("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn fetch_converts_to_markdown() {
        let server = MockServer::start().await;
        let page = r#"<html><body><main>
            <h1>A Paper</h1>
            <h2>1 Introduction</h2><p>Hello.</p>
        </main></body></html>"#;
        Mock::given(method("GET"))
            .and(path("/html/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;

        let source = HttpDocumentSource::new(options()).unwrap().allow_private_hosts();
        let doc = source.fetch(&format!("{}/html/1", server.uri())).await.unwrap();

        assert_eq!(doc.status, 200);
        assert_eq!(doc.title, "A Paper");
        assert!(doc.markdown.contains("## 1 Introduction"));
        assert_eq!(doc.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn http_error_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpDocumentSource::new(options()).unwrap().allow_private_hosts();
        let err = source.fetch(&format!("{}/missing", server.uri())).await.unwrap_err();
        assert!(matches!(err, PaperpipeError::Network(_)));
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let source = HttpDocumentSource::new(options()).unwrap();
        let err = source.fetch("http://127.0.0.1:9/x").await.unwrap_err();
        assert!(matches!(err, PaperpipeError::Validation { .. }));
    }
}
