use async_trait::async_trait;
use tracing::{info, warn};

use paperpipe_shared::{PipelineRecord, StageError, StageErrorKind};

use super::{Generation, truncate_chars};
use crate::orchestrator::Stage;
use crate::prompts::{SUMMARY_FAILED, SUMMARY_SUFFIX};

/// One summary per selected section. A failed section gets
/// [`SUMMARY_FAILED`] and an error entry; the others are still summarized.
pub struct Summarizer {
    generation: Generation,
    prompt: String,
    max_chars: usize,
}

impl Summarizer {
    pub fn new(generation: Generation, prompt: impl Into<String>, max_chars: usize) -> Self {
        Self {
            generation,
            prompt: prompt.into(),
            max_chars,
        }
    }
}

#[async_trait]
impl Stage for Summarizer {
    fn name(&self) -> &'static str {
        "summarize"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        let targets: Vec<_> = record
            .selected_keys
            .iter()
            .filter_map(|key| {
                record
                    .sections
                    .get(key)
                    .map(|body| (key.clone(), truncate_chars(body, self.max_chars).to_string()))
            })
            .collect();

        if targets.is_empty() {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingInput,
                "no selected sections to summarize",
            ));
        }

        let mut failed = 0;
        for (key, body) in targets {
            let prompt = format!("{}\n{body}{SUMMARY_SUFFIX}", self.prompt);
            let summary = match self.generation.text(self.name(), &prompt).await {
                Ok(text) => text.trim().to_string(),
                Err(mut err) => {
                    warn!(section = %key, error = %err, "summary failed");
                    err.message = format!("{key}: {}", err.message);
                    record.push_error(err);
                    failed += 1;
                    SUMMARY_FAILED.to_string()
                }
            };
            record.summaries.insert(key, summary);
        }

        info!(summaries = record.summaries.len(), failed, "sections summarized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::FakeGenerator;
    use paperpipe_llm::GenerationError;
    use std::sync::Arc;

    fn summary<'a>(record: &'a PipelineRecord, key: &str) -> Option<&'a str> {
        let key = paperpipe_shared::SectionKey::from_title(key)?;
        record.summaries.get(&key).map(String::as_str)
    }

    fn record() -> PipelineRecord {
        let mut record = PipelineRecord::with_text("doc", "");
        record.sections = paperpipe_markdown::chunk("## Intro\nalpha\n## Method\nbeta\n## Results\ngamma");
        record.selected_keys = record.sections.keys().cloned().collect();
        record
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let llm = FakeGenerator::new(|prompt| {
            if prompt.contains("beta") {
                Err(GenerationError::Provider("content filtered".into()))
            } else {
                Ok(" short summary \n".into())
            }
        });
        let stage = Summarizer::new(Generation::new(Arc::new(llm), 0), "Summarize:", 100);
        let mut record = record();
        stage.run(&mut record).await.unwrap();

        assert_eq!(record.summaries.len(), 3);
        assert_eq!(summary(&record, "method"), Some(SUMMARY_FAILED));
        assert_eq!(summary(&record, "intro"), Some("short summary"));
        assert_eq!(record.errors().len(), 1);
        assert!(record.errors()[0].message.starts_with("method:"));
    }

    #[tokio::test]
    async fn prompt_shape_and_truncation() {
        let llm = Arc::new(FakeGenerator::fixed("ok"));
        let stage = Summarizer::new(Generation::new(llm.clone(), 0), "Summarize:", 3);
        let mut record = record();
        record.selected_keys.truncate(1);
        stage.run(&mut record).await.unwrap();

        assert_eq!(llm.prompts.lock().unwrap()[0], format!("Summarize:\nalp{SUMMARY_SUFFIX}"));
        assert_eq!(record.summaries.len(), 1);
    }

    #[tokio::test]
    async fn nothing_selected_is_missing_input() {
        let stage = Summarizer::new(Generation::new(Arc::new(FakeGenerator::fixed("x")), 0), "S", 10);
        let mut record = PipelineRecord::new("doc");
        let err = stage.run(&mut record).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::MissingInput);
    }
}
