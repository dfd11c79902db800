use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;

use paperpipe_markdown::normalize_text;
use paperpipe_shared::{PipelineRecord, StageError, StageErrorKind};

use crate::orchestrator::Stage;

/// Accent stripping, case folding and whitespace collapsing over section
/// bodies, summaries, keywords and references.
pub struct Preprocessor;

fn normalize_set(set: &BTreeSet<String>) -> BTreeSet<String> {
    set.iter()
        .map(|s| normalize_text(s))
        .filter(|s| !s.is_empty())
        .collect()
}

#[async_trait]
impl Stage for Preprocessor {
    fn name(&self) -> &'static str {
        "preprocess"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        if record.sections.is_empty() && record.summaries.is_empty() {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingInput,
                "no sections or summaries to preprocess",
            ));
        }

        for (_, body) in record.sections.iter_mut() {
            *body = normalize_text(body);
        }
        for summary in record.summaries.values_mut() {
            *summary = normalize_text(summary);
        }
        record.keywords = normalize_set(&record.keywords);
        record.references = normalize_set(&record.references);

        debug!(
            sections = record.sections.len(),
            keywords = record.keywords.len(),
            "record normalized"
        );
        Ok(())
    }
}
