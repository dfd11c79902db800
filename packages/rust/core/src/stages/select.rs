use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{info, warn};

use paperpipe_shared::{
    PipelineRecord, SectionKey, Sections, StageError, StageErrorKind, normalize_key,
};

use super::Generation;
use crate::orchestrator::Stage;
use crate::prompts::SELECTION_SUFFIX;

/// Outcome of asking the generator which sections to keep.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Keys to keep, in section order.
    Filtered(Vec<SectionKey>),
    /// The response was unusable; every section is kept.
    Unfiltered(StageError),
}

/// Drops sections the generator considers non-descriptive. Fails open: when
/// the answer cannot be used, the sections stay as they are.
pub struct ChunkSelector {
    generation: Generation,
    prompt: String,
}

impl ChunkSelector {
    pub fn new(generation: Generation, prompt: impl Into<String>) -> Self {
        Self {
            generation,
            prompt: prompt.into(),
        }
    }

    pub async fn select(&self, sections: &Sections) -> Selection {
        let keys: Vec<&str> = sections.keys().map(SectionKey::as_str).collect();
        let listing = serde_json::to_string(&keys).unwrap_or_default();
        let prompt = format!("{}\n{listing}{SELECTION_SUFFIX}", self.prompt);

        let returned = match self.generation.list(self.name(), &prompt).await {
            Ok(list) => list,
            Err(e) => return Selection::Unfiltered(e),
        };

        let wanted: HashSet<String> = returned.iter().map(|k| normalize_key(k)).collect();
        let kept: Vec<SectionKey> = sections
            .keys()
            .filter(|k| wanted.contains(k.as_str()))
            .cloned()
            .collect();

        if kept.is_empty() {
            return Selection::Unfiltered(StageError::new(
                self.name(),
                StageErrorKind::MalformedResponse,
                format!("none of the {} returned keys name a section", returned.len()),
            ));
        }
        Selection::Filtered(kept)
    }
}

#[async_trait]
impl Stage for ChunkSelector {
    fn name(&self) -> &'static str {
        "select"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        if record.sections.is_empty() {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingInput,
                "no sections to select from",
            ));
        }

        match self.select(&record.sections).await {
            Selection::Filtered(keys) => {
                let keep: HashSet<&SectionKey> = keys.iter().collect();
                let before = record.sections.len();
                record.sections.retain(|k| keep.contains(k));
                info!(kept = keys.len(), dropped = before - keys.len(), "sections selected");
                record.selected_keys = keys;
                Ok(())
            }
            Selection::Unfiltered(err) => {
                warn!(error = %err, "selection unusable, keeping all sections");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::FakeGenerator;
    use paperpipe_llm::GenerationError;
    use std::sync::Arc;

    fn record() -> PipelineRecord {
        let mut record = PipelineRecord::with_text("doc", "");
        record.sections = paperpipe_markdown::chunk(
            "## Abstract\nA\n## 1 Introduction\nB\n## Acknowledgements\nC\n## References\nD",
        );
        record.selected_keys = record.sections.keys().cloned().collect();
        record
    }

    fn selector(llm: FakeGenerator) -> ChunkSelector {
        ChunkSelector::new(Generation::new(Arc::new(llm), 0), "Pick sections.")
    }

    #[tokio::test]
    async fn keeps_only_returned_keys() {
        let llm = FakeGenerator::fixed(r#"```json
["abstract", "1_introduction", "not_a_section"]
```"#);
        let mut record = record();
        selector(llm).run(&mut record).await.unwrap();

        let keys: Vec<_> = record.sections.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["abstract", "1_introduction"]);
        assert_eq!(record.selected_keys.len(), 2);
        assert!(record.errors().is_empty());
    }

    #[tokio::test]
    async fn prompt_lists_keys_with_suffix() {
        let llm = Arc::new(FakeGenerator::fixed(r#"["abstract"]"#));
        let selector = ChunkSelector::new(Generation::new(llm.clone(), 0), "Pick sections.");
        selector.select(&record().sections).await;

        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Pick sections.\n[\"abstract\",\"1_introduction\""));
        assert!(prompt.ends_with(SELECTION_SUFFIX));
    }

    #[tokio::test]
    async fn non_list_response_leaves_sections_and_records_one_error() {
        let mut record = PipelineRecord::new("doc");
        record.sections = self::record().sections;
        let before = record.sections.clone();

        let pipeline = crate::orchestrator::Pipeline::builder("select-only")
            .then(selector(FakeGenerator::fixed(r#"{"abstract": true}"#)))
            .build()
            .unwrap();
        let record = pipeline
            .run(record, &crate::orchestrator::SilentProgress)
            .await
            .unwrap();

        assert_eq!(record.sections, before);
        assert_eq!(record.errors().len(), 1);
        assert_eq!(record.errors()[0].kind, StageErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn unmatched_keys_fail_open() {
        let selection = selector(FakeGenerator::fixed(r#"["methods"]"#))
            .select(&record().sections)
            .await;
        assert!(matches!(selection, Selection::Unfiltered(_)));
    }

    #[tokio::test]
    async fn provider_error_fails_open() {
        let llm = FakeGenerator::new(|_| Err(GenerationError::Provider("quota".into())));
        let mut record = record();
        let err = selector(llm).run(&mut record).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Provider);
        assert_eq!(record.sections.len(), 4);
    }
}
