//! Append-only JSON Lines cache of generated extraction schemas.
//!
//! Each line is `{"url": ..., "schema": {...}}`. A lookup scans the file in
//! order and returns the first schema whose URL host is the queried host or
//! one of its parent domains.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use paperpipe_shared::{PaperpipeError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct CacheLine {
    url: String,
    schema: Value,
}

/// File-backed schema cache.
#[derive(Debug, Clone)]
pub struct SchemaCache {
    path: PathBuf,
}

impl SchemaCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First cached schema matching the host of `url`. A missing file is an
    /// empty cache; unparsable lines are skipped.
    pub fn lookup(&self, url: &str) -> Result<Option<Value>> {
        let Some(host) = host_of(url) else {
            return Ok(None);
        };
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PaperpipeError::io(&self.path, e)),
        };

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| PaperpipeError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: CacheLine = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "skipping malformed schema cache line");
                    continue;
                }
            };
            let Some(cached_host) = host_of(&entry.url) else {
                continue;
            };
            if host_matches(&host, &cached_host) {
                debug!(%url, cached = %entry.url, "schema cache hit");
                return Ok(Some(entry.schema));
            }
        }
        Ok(None)
    }

    /// Append a schema for `url`.
    pub fn append(&self, url: &str, schema: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PaperpipeError::io(parent, e))?;
        }
        let line = serde_json::to_string(&CacheLine {
            url: url.to_string(),
            schema: schema.clone(),
        })
        .map_err(|e| PaperpipeError::Conversion(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PaperpipeError::io(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| PaperpipeError::io(&self.path, e))
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
}

/// `host` equals `cached` or is a subdomain of it.
fn host_matches(host: &str, cached: &str) -> bool {
    host == cached
        || host
            .strip_suffix(cached)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
