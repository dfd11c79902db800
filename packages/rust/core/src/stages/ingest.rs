use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use paperpipe_crawler::DocumentSource;
use paperpipe_shared::{PipelineRecord, StageError, StageErrorKind};

use crate::orchestrator::Stage;

/// Fetch the record's source locator and store the document as markdown.
pub struct FetchStage {
    source: Arc<dyn DocumentSource>,
}

impl FetchStage {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Stage for FetchStage {
    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        if record.raw_text.is_some() {
            debug!("document text already present, skipping fetch");
            return Ok(());
        }
        let doc = self
            .source
            .fetch(record.source_locator())
            .await
            .map_err(|e| StageError::new(self.name(), StageErrorKind::Transport, e.to_string()))?;
        info!(url = %doc.url, chars = doc.markdown.len(), "document fetched");
        record.raw_text = Some(doc.markdown);
        Ok(())
    }
}

/// Split the document text into sections; every section starts selected.
pub struct ChunkStage;

#[async_trait]
impl Stage for ChunkStage {
    fn name(&self) -> &'static str {
        "chunk"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        let Some(text) = record.raw_text.as_deref() else {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingInput,
                "no document text to chunk",
            ));
        };
        record.sections = paperpipe_markdown::chunk(text);
        record.selected_keys = record.sections.keys().cloned().collect();
        info!(sections = record.sections.len(), "document chunked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use paperpipe_crawler::FetchedDocument;
    use paperpipe_shared::PaperpipeError;

    struct StaticSource(Option<&'static str>);

    #[async_trait]
    impl DocumentSource for StaticSource {
        async fn fetch(&self, url: &str) -> paperpipe_shared::Result<FetchedDocument> {
            match self.0 {
                Some(markdown) => Ok(FetchedDocument {
                    url: url.to_string(),
                    status: 200,
                    html: String::new(),
                    markdown: markdown.to_string(),
                    title: String::new(),
                    content_hash: String::new(),
                    fetched_at: Utc::now(),
                }),
                None => Err(PaperpipeError::Network(format!("{url}: HTTP 503"))),
            }
        }
    }

    #[tokio::test]
    async fn fetch_then_chunk() {
        let mut record = PipelineRecord::new("https://arxiv.org/html/1");
        FetchStage::new(Arc::new(StaticSource(Some("## Abstract\nText\n## 1 Intro\nMore"))))
            .run(&mut record)
            .await
            .unwrap();
        ChunkStage.run(&mut record).await.unwrap();

        let keys: Vec<_> = record.selected_keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["abstract", "1_intro"]);
        assert_eq!(record.sections.get_str("1_intro"), Some("More"));
    }

    #[tokio::test]
    async fn fetch_failure_is_transport_error() {
        let mut record = PipelineRecord::new("https://arxiv.org/html/1");
        let err = FetchStage::new(Arc::new(StaticSource(None)))
            .run(&mut record)
            .await
            .unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Transport);
        assert!(record.raw_text.is_none());
    }

    #[tokio::test]
    async fn chunk_without_text_is_missing_input() {
        let mut record = PipelineRecord::new("doc");
        let err = ChunkStage.run(&mut record).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::MissingInput);
    }

    #[tokio::test]
    async fn chunk_without_headings_is_empty() {
        let mut record = PipelineRecord::with_text("doc", "just prose");
        ChunkStage.run(&mut record).await.unwrap();
        assert!(record.sections.is_empty());
        assert!(record.selected_keys.is_empty());
    }
}
