//! Stages of the abstract search pipeline. The record's source locator is
//! the search query.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use paperpipe_discovery::ArticleSearch;
use paperpipe_shared::{PipelineRecord, StageError, StageErrorKind};
use paperpipe_storage::{Storage, UpsertOutcome};

use super::Generation;
use crate::orchestrator::Stage;
use crate::prompts::ABSTRACT_KEYWORDS_SUFFIX;

/// Fill `record.articles` from the search API.
pub struct SearchStage {
    search: Arc<dyn ArticleSearch>,
}

impl SearchStage {
    pub fn new(search: Arc<dyn ArticleSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Stage for SearchStage {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        let found = self.search.search(record.source_locator()).await;
        info!(articles = found.len(), "search finished");
        for article in found {
            if !record.articles.iter().any(|a| a.id == article.id) {
                record.articles.push(article);
            }
        }
        Ok(())
    }
}

/// Keywords for each article abstract, isolated per article.
pub struct AbstractKeywordStage {
    generation: Generation,
    prompt: String,
}

impl AbstractKeywordStage {
    pub fn new(generation: Generation, prompt: impl Into<String>) -> Self {
        Self {
            generation,
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Stage for AbstractKeywordStage {
    fn name(&self) -> &'static str {
        "abstract_keywords"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        if record.articles.is_empty() {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingInput,
                "no articles to annotate",
            ));
        }

        let mut errors = Vec::new();
        for article in record.articles.iter_mut() {
            if article.abstract_text.trim().is_empty() {
                errors.push(StageError::new(
                    self.name(),
                    StageErrorKind::MissingInput,
                    format!("{}: empty abstract", article.id),
                ));
                continue;
            }
            let prompt = format!("{}{}{ABSTRACT_KEYWORDS_SUFFIX}", self.prompt, article.abstract_text);
            match self.generation.list(self.name(), &prompt).await {
                Ok(keywords) => {
                    let mut unique = Vec::with_capacity(keywords.len());
                    for keyword in keywords {
                        if !unique.contains(&keyword) {
                            unique.push(keyword);
                        }
                    }
                    article.keywords = unique;
                }
                Err(mut err) => {
                    warn!(article = %article.id, error = %err, "keyword extraction failed");
                    err.message = format!("{}: {}", article.id, err.message);
                    errors.push(err);
                }
            }
        }

        let all: Vec<String> = record
            .articles
            .iter()
            .flat_map(|a| a.keywords.iter().cloned())
            .collect();
        record.keywords.extend(all);
        for err in errors {
            record.push_error(err);
        }
        Ok(())
    }
}

/// Insert each article into the article collection, keyed by its id.
pub struct ArticleWriterStage {
    storage: Arc<Storage>,
}

impl ArticleWriterStage {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Stage for ArticleWriterStage {
    fn name(&self) -> &'static str {
        "write_articles"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        if record.articles.is_empty() {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingInput,
                "no articles to write",
            ));
        }

        let query = record.source_locator().to_string();
        let (mut inserted, mut skipped) = (0, 0);
        let mut errors = Vec::new();
        for article in &record.articles {
            match self.storage.insert_article(article, &query).await {
                Ok(UpsertOutcome::Inserted) => inserted += 1,
                Ok(UpsertOutcome::Skipped) => skipped += 1,
                Err(e) => errors.push(StageError::new(
                    self.name(),
                    StageErrorKind::Storage,
                    format!("{}: {e}", article.id),
                )),
            }
        }
        for err in errors {
            record.push_error(err);
        }
        info!(inserted, skipped, "articles written");
        Ok(())
    }
}
