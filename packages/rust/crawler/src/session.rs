//! Deduplication state for one crawl run, plus JSONL output.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use serde_json::Value;

use paperpipe_shared::{PaperpipeError, Result};

use crate::fetch::normalize_url;

/// Visited locators and admitted items of a crawl. Owned by the coordinator
/// task, so every check-and-insert is atomic without locking.
#[derive(Debug, Default)]
pub struct CrawlSession {
    visited: HashSet<String>,
    identities: HashSet<String>,
    results: Vec<Value>,
}

impl CrawlSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a locator as scheduled. Returns `false` if it was already seen.
    pub fn mark_visited(&mut self, locator: &str) -> bool {
        self.visited.insert(normalize_url(locator))
    }

    pub fn is_visited(&self, locator: &str) -> bool {
        self.visited.contains(&normalize_url(locator))
    }

    /// Keep an extracted item unless its `url` was already admitted.
    /// Items without a `url` carry no identity and are always kept.
    pub fn admit_item(&mut self, item: Value) -> bool {
        if let Some(url) = item.get("url").and_then(Value::as_str) {
            if !self.identities.insert(normalize_url(url)) {
                return false;
            }
        }
        self.results.push(item);
        true
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn into_results(self) -> Vec<Value> {
        self.results
    }
}

/// Write one JSON object per line, replacing any existing file.
pub fn save_jsonl(path: &Path, items: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PaperpipeError::io(parent, e))?;
    }
    let file = std::fs::File::create(path).map_err(|e| PaperpipeError::io(path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for item in items {
        let line = serde_json::to_string(item)
            .map_err(|e| PaperpipeError::Conversion(format!("jsonl item: {e}")))?;
        writeln!(writer, "{line}").map_err(|e| PaperpipeError::io(path, e))?;
    }
    writer.flush().map_err(|e| PaperpipeError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn visited_is_normalized() {
        let mut session = CrawlSession::new();
        assert!(session.mark_visited("https://example.org/a/"));
        assert!(!session.mark_visited("https://example.org/a#frag"));
        assert!(session.is_visited("https://example.org/a"));
        assert_eq!(session.visited_count(), 1);
    }

    #[test]
    fn items_deduplicated_by_url() {
        let mut session = CrawlSession::new();
        assert!(session.admit_item(json!({"title": "A", "url": "https://x.org/1"})));
        assert!(!session.admit_item(json!({"title": "A again", "url": "https://x.org/1/"})));
        assert!(session.admit_item(json!({"title": "no url"})));
        assert!(session.admit_item(json!({"title": "no url"})));
        assert_eq!(session.results().len(), 3);
    }

    #[test]
    fn jsonl_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("paperpipe-{}", uuid::Uuid::now_v7()))
            .join("out.jsonl");
        let items = vec![json!({"a": 1}), json!({"b": "two"})];
        save_jsonl(&path, &items).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, items);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
