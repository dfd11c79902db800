//! Post-conversion cleanup pipeline for paper Markdown.
//!
//! Each pass is a function `&str -> String` applied in sequence. The passes
//! prepare the text for section chunking: one H1, section headings on their own
//! lines, no stray markup.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = normalize_headings(&result);
    result = promote_abstract_heading(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = clean_blank_lines(&result);
    result = trim_lines(&result);

    let trimmed = result.trim_end_matches('\n');
    format!("{trimmed}\n")
}

/// Shared fence tracker so passes never touch code blocks.
fn map_outside_fences(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if is_fence(line) {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence { line.to_string() } else { f(line) }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

/// Keep the first H1 (the paper title) and demote later ones to H2.
fn normalize_headings(md: &str) -> String {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#\s+(.+)$").expect("valid regex"));

    let mut seen_h1 = false;
    map_outside_fences(md, |line| match H1_RE.captures(line) {
        Some(caps) if seen_h1 => format!("## {}", &caps[1]),
        Some(_) => {
            seen_h1 = true;
            line.to_string()
        }
        None => line.to_string(),
    })
}

/// LaTeXML renders the abstract title as a low-level heading; lift it to a
/// primary section so it can serve as an anchor.
fn promote_abstract_heading(md: &str) -> String {
    static ABSTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^#{4,6}\s+(abstract)\s*[.:]?\s*$").expect("valid regex")
    });

    map_outside_fences(md, |line| match ABSTRACT_RE.captures(line) {
        Some(caps) => format!("## {}", &caps[1]),
        None => line.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

/// Remove structural tags that survived conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|figure|figcaption|cite|math|mrow|mi|mo|mn|semantics|annotation)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    map_outside_fences(md, |line| HTML_TAG_RE.replace_all(line, "").to_string())
}

/// Resolve relative URLs in Markdown links against the page URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    map_outside_fences(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &regex::Captures| {
                let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
                if href.starts_with('#') || href.contains("://") || href.starts_with("mailto:") {
                    return caps[0].to_string();
                }
                match base.join(href) {
                    Ok(resolved) => format!("{bang}[{text}]({resolved})"),
                    Err(_) => caps[0].to_string(),
                }
            })
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into one.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

fn trim_lines(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}
