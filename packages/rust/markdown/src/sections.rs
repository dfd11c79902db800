//! Section-aware chunking of paper Markdown.
//!
//! `##` and `###` headings both open a section in one flat, ordered map. A
//! section body runs until the next heading of either level. Rules:
//! - text before the first heading (title, author block) is discarded
//! - a `###` heading seen before any `##` heading is dropped with its body
//! - headings inside fenced code blocks are body text
//! - a later section whose key collides replaces the earlier body
//! - a heading whose title normalizes to nothing is dropped with its body

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use paperpipe_shared::{SectionKey, Sections};

use crate::cleanup::is_fence;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{2,3})\s+(.*?)\s*$").expect("valid regex"));

static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9][0-9.]*)\s+(.*)$").expect("valid regex"));

/// Split Markdown into `SectionKey -> body`. No headings yields an empty map.
pub fn chunk(document: &str) -> Sections {
    let mut sections = Sections::new();
    let mut current: Option<(SectionKey, Vec<&str>)> = None;
    let mut seen_primary = false;
    let mut in_fence = false;

    for line in document.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        }

        let heading = if in_fence { None } else { HEADING_RE.captures(line) };
        let Some(caps) = heading else {
            if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
            continue;
        };

        flush(&mut sections, current.take());

        let primary = caps[1].len() == 2;
        if !primary && !seen_primary {
            debug!(title = &caps[2], "dropping secondary heading before any primary heading");
            continue;
        }
        seen_primary |= primary;

        match title_key(&caps[2]) {
            Some(key) => current = Some((key, Vec::new())),
            None => debug!(title = &caps[2], "heading title has no usable key"),
        }
    }
    flush(&mut sections, current);

    sections
}

fn flush(sections: &mut Sections, section: Option<(SectionKey, Vec<&str>)>) {
    if let Some((key, body)) = section {
        let body = body.join("\n").trim().to_string();
        if let Some(previous) = sections.insert(key.clone(), body) {
            debug!(key = %key, replaced_len = previous.len(), "duplicate section key overwritten");
        }
    }
}

/// Key for a heading title.
///
/// A leading dotted numeral (`2.1 Strategy`) becomes `2_1_strategy`; any other
/// title has its whitespace replaced by underscores. Both forms then go through
/// [`SectionKey::from_title`].
pub fn title_key(title: &str) -> Option<SectionKey> {
    let title = title.trim().trim_end_matches('#').trim();
    let raw = match NUMBERED_RE.captures(title) {
        Some(caps) => format!("{}_{}", caps[1].trim_end_matches('.').replace('.', "_"), &caps[2]),
        None => title.split_whitespace().collect::<Vec<_>>().join("_"),
    };
    SectionKey::from_title(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperpipe_shared::normalize_key;

    fn keys(sections: &Sections) -> Vec<&str> {
        sections.keys().map(SectionKey::as_str).collect()
    }

    #[test]
    fn no_headings_is_empty() {
        assert!(chunk("").is_empty());
        assert!(chunk("just a paragraph\n\n# Only a title").is_empty());
        assert!(chunk("#### too deep\ntext").is_empty());
    }

    #[test]
    fn numbered_sections() {
        let sections = chunk("\n## 1 Intro\nHello\n## 2 Related Work\nBye");
        assert_eq!(keys(&sections), vec!["1_intro", "2_related_work"]);
        assert_eq!(sections.get_str("1_intro"), Some("Hello"));
        assert_eq!(sections.get_str("2_related_work"), Some("Bye"));
    }

    #[test]
    fn dotted_numerals_and_plain_titles() {
        let sections = chunk("## 2.1. Strategy\na\n## Related Work\nb\n### 3.2.1 Deep Dive ##\nc");
        assert_eq!(keys(&sections), vec!["2_1_strategy", "related_work", "3_2_1_deep_dive"]);
    }

    #[test]
    fn secondary_before_primary_is_dropped() {
        let sections = chunk("### Orphan\nlost\n## Intro\nkept\n### Detail\nsub");
        assert_eq!(keys(&sections), vec!["intro", "detail"]);
        assert_eq!(sections.get_str("intro"), Some("kept"));
        assert_eq!(sections.get_str("detail"), Some("sub"));
    }

    #[test]
    fn preamble_is_discarded() {
        let sections = chunk("# Title\nAuthors\n\n## Abstract\nWe propose.");
        assert_eq!(keys(&sections), vec!["abstract"]);
        assert_eq!(sections.get_str("abstract"), Some("We propose."));
    }

    #[test]
    fn fenced_headings_are_body_text() {
        let doc = "## Method\n```\n## not a section\n```\nafter";
        let sections = chunk(doc);
        assert_eq!(keys(&sections), vec!["method"]);
        assert_eq!(
            sections.get_str("method"),
            Some("```\n## not a section\n```\nafter")
        );
    }

    #[test]
    fn colliding_keys_overwrite() {
        let sections = chunk("## Results\nfirst\n## Discussion\nd\n## results\nsecond");
        assert_eq!(keys(&sections), vec!["results", "discussion"]);
        assert_eq!(sections.get_str("results"), Some("second"));
    }

    #[test]
    fn unusable_titles_are_skipped() {
        let sections = chunk("## ***\nnoise\n## Real\nsignal");
        assert_eq!(keys(&sections), vec!["real"]);
    }

    #[test]
    fn every_key_is_a_normalization_fixed_point() {
        let doc = "## 1 Intro!\nx\n### 1.2 Why (Not)?\ny\n## Ünïcode Títle\nz\n## A -- B\nw";
        for key in chunk(doc).keys() {
            assert_eq!(normalize_key(key.as_str()), key.as_str());
        }
    }
}
