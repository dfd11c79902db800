use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use paperpipe_shared::{ContentAddress, PipelineRecord, StageError, StageErrorKind, StoredChunk};
use paperpipe_storage::{UpsertOutcome, VectorStore};

use crate::orchestrator::Stage;
use crate::prompts::is_failed_summary;

/// Persist one chunk per selected section: its summary when there is one,
/// the section body otherwise. A failed summary counts as no summary.
/// Existing content addresses are skipped.
pub struct ChunkWriter {
    store: Arc<dyn VectorStore>,
}

impl ChunkWriter {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for ChunkWriter {
    fn name(&self) -> &'static str {
        "write"
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        let chunks: Vec<StoredChunk> = record
            .selected_keys
            .iter()
            .filter_map(|key| {
                let text = record
                    .summaries
                    .get(key)
                    .map(String::as_str)
                    .filter(|s| !is_failed_summary(s))
                    .or_else(|| record.sections.get(key))?;
                Some(StoredChunk {
                    address: ContentAddress::new(record.source_locator(), key.clone()),
                    text: text.to_string(),
                })
            })
            .collect();

        if chunks.is_empty() {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingInput,
                "no selected sections to write",
            ));
        }

        let (mut inserted, mut skipped) = (0, 0);
        for chunk in &chunks {
            match self.store.upsert(chunk).await {
                Ok(UpsertOutcome::Inserted) => inserted += 1,
                Ok(UpsertOutcome::Skipped) => skipped += 1,
                Err(e) => {
                    warn!(section = %chunk.address.section_key, error = %e, "chunk write failed");
                    record.push_error(StageError::new(
                        self.name(),
                        StageErrorKind::Storage,
                        format!("{}: {e}", chunk.address.section_key),
                    ));
                }
            }
        }

        info!(inserted, skipped, "chunks written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperpipe_shared::SectionKey;
    use paperpipe_storage::Storage;
    use uuid::Uuid;

    async fn store() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("pp_core_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn record() -> PipelineRecord {
        let mut record = PipelineRecord::with_text("https://arxiv.org/html/1", "");
        record.sections = paperpipe_markdown::chunk("## Intro\nbody one\n## Method\nbody two");
        record.selected_keys = record.sections.keys().cloned().collect();
        record
            .summaries
            .insert(SectionKey::from_title("intro").unwrap(), "summary one".into());
        record
    }

    #[tokio::test]
    async fn writes_summary_or_body() {
        let storage = store().await;
        let mut record = record();
        ChunkWriter::new(storage.clone()).run(&mut record).await.unwrap();

        let stored = storage.chunks_for_document("https://arxiv.org/html/1").await.unwrap();
        let texts: Vec<_> = stored.iter().map(|c| (c.section_key.as_str(), c.text.as_str())).collect();
        assert_eq!(texts, vec![("intro", "summary one"), ("method", "body two")]);
    }

    #[tokio::test]
    async fn failed_summary_falls_back_to_body() {
        let storage = store().await;
        let mut record = record();
        let method = SectionKey::from_title("method").unwrap();
        record.summaries.insert(method, crate::prompts::SUMMARY_FAILED.into());
        record.summaries.insert(
            SectionKey::from_title("intro").unwrap(),
            paperpipe_markdown::normalize_text(crate::prompts::SUMMARY_FAILED),
        );
        ChunkWriter::new(storage.clone()).run(&mut record).await.unwrap();

        let stored = storage.chunks_for_document("https://arxiv.org/html/1").await.unwrap();
        let texts: Vec<_> = stored.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["body one", "body two"]);
    }

    #[tokio::test]
    async fn rerun_skips_existing_chunks() {
        let storage = store().await;
        let writer = ChunkWriter::new(storage.clone());
        writer.run(&mut record()).await.unwrap();
        writer.run(&mut record()).await.unwrap();
        assert_eq!(storage.chunk_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn nothing_selected_is_missing_input() {
        let storage = store().await;
        let mut record = PipelineRecord::new("doc");
        let err = ChunkWriter::new(storage).run(&mut record).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::MissingInput);
    }
}
