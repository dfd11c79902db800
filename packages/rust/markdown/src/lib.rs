//! Markdown handling for scholarly documents.
//!
//! - [`convert`] turns a fetched HTML paper page into cleaned Markdown (`htmd` +
//!   a series of cleanup passes).
//! - [`chunk`] splits Markdown into an ordered map of section keys to bodies.
//! - [`normalize_text`] is the deterministic text normalization used by the
//!   preprocessing stage.

mod cleanup;
mod normalize;
mod sections;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use paperpipe_shared::{PaperpipeError, Result};

pub use normalize::normalize_text;
pub use sections::{chunk, title_key};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML page to Markdown.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// The cleaned Markdown body.
    pub markdown: String,
    /// Extracted or inferred document title.
    pub title: String,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert HTML to clean Markdown.
///
/// 1. Extracts the document body (LaTeXML paper containers first, then
///    generic `<article>`/`<main>`/`<body>`)
/// 2. Pre-processes HTML tables into markdown tables
/// 3. Converts HTML to Markdown via `htmd`
/// 4. Runs the cleanup pipeline
#[instrument(skip(html), fields(url = %source_url))]
pub fn convert(html: &str, source_url: &str) -> Result<ConvertResult> {
    let content_html = extract_content_html(html);
    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "header", "footer",
        ])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| PaperpipeError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let base_url = Url::parse(source_url).ok();
    let markdown = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());

    let title = extract_title_from_markdown(&markdown).unwrap_or_else(|| "Untitled".to_string());

    debug!(title = %title, final_len = markdown.len(), "conversion complete");

    Ok(ConvertResult { markdown, title })
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

/// Replace `<table>` elements with pipe tables; `htmd` 0.1 drops table structure.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);

    let mut result = html.to_string();
    for table in doc.select(&TABLE_SEL) {
        let rows: Vec<Vec<String>> = table
            .select(&TR_SEL)
            .map(|tr| {
                tr.select(&CELL_SEL)
                    .map(|cell| collapse_ws(&cell.text().collect::<String>()))
                    .collect::<Vec<_>>()
            })
            .filter(|cells| !cells.is_empty())
            .collect();

        result = result.replacen(&table.html(), &pipe_table(rows), 1);
    }
    result
}

fn pipe_table(mut rows: Vec<Vec<String>>) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(width, String::new());
    }

    let mut md = String::from("\n\n");
    for (i, row) in rows.iter().enumerate() {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
        if i == 0 {
            md.push_str(&format!("|{}\n", " --- |".repeat(width)));
        }
    }
    md.push('\n');
    md
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the paper body, dropping site chrome and bibliography widgets.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let selectors = [
        "article.ltx_document", // arXiv LaTeXML render
        ".ltx_page_main",
        "#content-inner",
        "article",
        "main",
        "[role=\"main\"]",
        "body",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}
