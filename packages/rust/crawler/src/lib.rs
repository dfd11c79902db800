//! Document fetching and recursive search-expansion crawling.
//!
//! This crate provides:
//! - [`DocumentSource`] / [`HttpDocumentSource`]: URL to HTML + Markdown
//! - [`OriginThrottle`]: jittered spacing of requests to one origin
//! - [`CrawlSession`] and [`CrawlCoordinator`]: dedup state plus a bounded
//!   worker pool driving a [`CrawlHandler`]
//! - [`extract_related_searches`]: "Related searches" expansion links
//! - [`ExtractionSchema`]: CSS-selector item extraction

pub mod extract;
pub mod fetch;
pub mod pool;
pub mod related;
pub mod session;
pub mod throttle;

pub use extract::{ExtractionSchema, FieldKind, SchemaField};
pub use fetch::{DocumentSource, FetchOptions, FetchedDocument, HttpDocumentSource, normalize_url};
pub use pool::{CrawlCoordinator, CrawlHandler, CrawlReport, CrawlTask, TaskOutput};
pub use related::{extract_related_searches, query_param, with_year_filter};
pub use session::{CrawlSession, save_jsonl};
pub use throttle::OriginThrottle;
