//! Core domain types threaded through the paperpipe pipelines.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SectionKey
// ---------------------------------------------------------------------------

/// Normalized identifier derived from a markdown heading.
///
/// Keys contain only lower-case alphanumerics separated by single underscores,
/// so normalizing an existing key returns it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionKey(String);

impl SectionKey {
    /// Normalize a raw heading title into a key.
    ///
    /// Leading `#` markers are stripped, the text is lower-cased, and every run
    /// of non-alphanumeric characters (dots of a numeric prefix included)
    /// collapses to one underscore. Returns `None` when nothing is left.
    pub fn from_title(title: &str) -> Option<Self> {
        let key = normalize_key(title);
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive substring test used for anchor lookup.
    pub fn contains(&self, needle: &str) -> bool {
        self.0.contains(&needle.to_lowercase())
    }
}

impl std::fmt::Display for SectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key normalization shared by [`SectionKey::from_title`] and its tests.
pub fn normalize_key(raw: &str) -> String {
    let stripped = raw.trim_start().trim_start_matches('#');
    let lowered = stripped.to_lowercase();

    let mut key = String::with_capacity(lowered.len());
    let mut pending_sep = false;
    for ch in lowered.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.push(ch);
        } else {
            pending_sep = true;
        }
    }
    key
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Insertion-ordered map of section keys to bodies.
///
/// Inserting an existing key replaces its body and keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sections(Vec<(SectionKey, String)>);

impl Sections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a section. Returns the previous body when the key collided.
    pub fn insert(&mut self, key: SectionKey, body: String) -> Option<String> {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, body)),
            None => {
                self.0.push((key, body));
                None
            }
        }
    }

    pub fn get(&self, key: &SectionKey) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, body)| body.as_str())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, body)| body.as_str())
    }

    pub fn contains_key(&self, key: &SectionKey) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SectionKey> {
        self.0.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SectionKey, &str)> {
        self.0.iter().map(|(k, body)| (k, body.as_str()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SectionKey, &mut String)> {
        self.0.iter_mut().map(|(k, body)| (&*k, body))
    }

    /// Keep only the sections whose key satisfies `keep`, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&SectionKey) -> bool) {
        self.0.retain(|(k, _)| keep(k));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(SectionKey, String)> for Sections {
    fn from_iter<I: IntoIterator<Item = (SectionKey, String)>>(iter: I) -> Self {
        let mut sections = Self::new();
        for (key, body) in iter {
            sections.insert(key, body);
        }
        sections
    }
}

// ---------------------------------------------------------------------------
// StageError
// ---------------------------------------------------------------------------

/// Classification of a soft, per-stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Network failure talking to a collaborator.
    Transport,
    /// Provider refused the call because of rate limiting.
    RateLimited,
    /// Generated text could not be repaired into the required shape.
    MalformedResponse,
    /// No section matched any anchor candidate.
    MissingAnchor,
    /// A field the stage reads was never populated.
    MissingInput,
    /// Non-retryable error reported by the text-generation provider.
    Provider,
    /// Rate limiting outlasted the retry budget.
    ExhaustedRetries,
    /// Persistence gateway failure.
    Storage,
}

/// Structured annotation appended to [`PipelineRecord::errors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Name of the stage that produced the error.
    pub stage: String,
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(stage: impl Into<String>, kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {:?}: {}", self.stage, self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// ArticleMetadata
// ---------------------------------------------------------------------------

/// One search-API hit, enriched in place by downstream stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    /// Canonical abstract-page locator; the dedup key.
    pub id: String,
    pub pdf_locator: String,
    pub html_locator: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Content addressing
// ---------------------------------------------------------------------------

/// Composite identity of a stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentAddress {
    pub document_locator: String,
    pub section_key: SectionKey,
}

impl ContentAddress {
    pub fn new(document_locator: impl Into<String>, section_key: SectionKey) -> Self {
        Self {
            document_locator: document_locator.into(),
            section_key,
        }
    }

    /// Deterministic store id: lowercase hex SHA-256 of `locator + "\n" + key`.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.document_locator.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.section_key.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A section payload ready for the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub address: ContentAddress,
    /// Summary text, or the raw section body when no summary exists.
    pub text: String,
}

impl StoredChunk {
    /// Metadata stored alongside the chunk text.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "document_locator": self.address.document_locator,
            "section_key": self.address.section_key,
        })
    }
}

// ---------------------------------------------------------------------------
// PipelineRecord
// ---------------------------------------------------------------------------

/// Mutable per-document (or per-query) state threaded through one pipeline run.
///
/// The source locator is fixed at creation and `errors` is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    run_id: RunId,
    source_locator: String,
    pub raw_text: Option<String>,
    pub sections: Sections,
    pub selected_keys: Vec<SectionKey>,
    pub summaries: BTreeMap<SectionKey, String>,
    pub keywords: BTreeSet<String>,
    pub references: BTreeSet<String>,
    pub articles: Vec<ArticleMetadata>,
    errors: Vec<StageError>,
}

impl PipelineRecord {
    pub fn new(source_locator: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            source_locator: source_locator.into(),
            raw_text: None,
            sections: Sections::new(),
            selected_keys: Vec::new(),
            summaries: BTreeMap::new(),
            keywords: BTreeSet::new(),
            references: BTreeSet::new(),
            articles: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Start a record from text that is already in hand (no fetch stage).
    pub fn with_text(source_locator: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let mut record = Self::new(source_locator);
        record.raw_text = Some(raw_text.into());
        record
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn source_locator(&self) -> &str {
        &self.source_locator
    }

    pub fn errors(&self) -> &[StageError] {
        &self.errors
    }

    pub fn push_error(&mut self, error: StageError) {
        self.errors.push(error);
    }

    /// Fold a fan-out branch clone back into this record.
    ///
    /// `base_errors` is the error count of this record when the branch was
    /// cloned; only errors appended after that point are carried over.
    pub fn merge_branch(&mut self, branch: PipelineRecord, base_errors: usize) {
        self.keywords.extend(branch.keywords);
        self.references.extend(branch.references);
        self.summaries.extend(branch.summaries);
        self.errors
            .extend(branch.errors.into_iter().skip(base_errors));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SectionKey {
        SectionKey::from_title(s).expect("non-empty key")
    }

    #[test]
    fn key_normalization_rules() {
        assert_eq!(normalize_key("## 2.1 Strategy"), "2_1_strategy");
        assert_eq!(normalize_key("Related   Work!!"), "related_work");
        assert_eq!(normalize_key("  --Intro--  "), "intro");
        assert_eq!(normalize_key("Résumé"), "résumé");
        assert!(SectionKey::from_title("### ...").is_none());
    }

    #[test]
    fn key_normalization_is_idempotent() {
        for raw in ["## 1 Intro", "3.2.1 Deep_Nest (draft)", "İstanbul Notes", "a__b"] {
            let once = normalize_key(raw);
            assert_eq!(normalize_key(&once), once, "not a fixed point for {raw:?}");
        }
    }

    #[test]
    fn sections_overwrite_keeps_position() {
        let mut sections = Sections::new();
        sections.insert(key("intro"), "first".into());
        sections.insert(key("method"), "m".into());
        let previous = sections.insert(key("intro"), "second".into());

        assert_eq!(previous.as_deref(), Some("first"));
        let keys: Vec<_> = sections.keys().map(SectionKey::as_str).collect();
        assert_eq!(keys, vec!["intro", "method"]);
        assert_eq!(sections.get_str("intro"), Some("second"));
    }

    #[test]
    fn content_address_is_deterministic() {
        let a = ContentAddress::new("https://arxiv.org/abs/1", key("intro"));
        let b = ContentAddress::new("https://arxiv.org/abs/1", key("intro"));
        let c = ContentAddress::new("https://arxiv.org/abs/1", key("method"));
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().len(), 64);
    }

    #[test]
    fn merge_branch_unions_and_appends_new_errors() {
        let mut base = PipelineRecord::new("doc");
        base.push_error(StageError::new("fetch", StageErrorKind::Transport, "slow"));
        base.keywords.insert("a".into());

        let base_errors = base.errors().len();
        let mut branch = base.clone();
        branch.keywords.insert("b".into());
        branch.references.insert("ref".into());
        branch.push_error(StageError::new(
            "references",
            StageErrorKind::MissingAnchor,
            "no anchor",
        ));

        base.merge_branch(branch, base_errors);
        assert_eq!(base.keywords.len(), 2);
        assert_eq!(base.references.len(), 1);
        assert_eq!(base.errors().len(), 2);
        assert_eq!(base.errors()[1].stage, "references");
    }

    #[test]
    fn article_serializes_abstract_field() {
        let article = ArticleMetadata {
            id: "http://arxiv.org/abs/1".into(),
            abstract_text: "We study things.".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&article).expect("serialize");
        assert_eq!(json["abstract"], "We study things.");
    }
}
