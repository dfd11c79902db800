//! Pipeline stages.
//!
//! Every stage keeps failures inside its own boundary: it records a
//! [`StageError`] and leaves the record as it was at the point of failure.

mod anchored;
mod articles;
mod ingest;
mod preprocess;
mod select;
mod summarize;
mod write;

use std::sync::Arc;

use paperpipe_llm::{TextGenerator, extract_list, invoke_with_retry};
use paperpipe_shared::{StageError, StageErrorKind};

pub use anchored::{AnchorTarget, AnchoredExtractor};
pub use articles::{AbstractKeywordStage, ArticleWriterStage, SearchStage};
pub use ingest::{ChunkStage, FetchStage};
pub use preprocess::Preprocessor;
pub use select::{ChunkSelector, Selection};
pub use summarize::Summarizer;
pub use write::ChunkWriter;

/// A text generator plus the retry budget stages call it with.
#[derive(Clone)]
pub struct Generation {
    llm: Arc<dyn TextGenerator>,
    max_retries: u32,
}

impl Generation {
    pub fn new(llm: Arc<dyn TextGenerator>, max_retries: u32) -> Self {
        Self { llm, max_retries }
    }

    /// Generated text, or a stage error classified by failure kind.
    pub async fn text(&self, stage: &str, prompt: &str) -> Result<String, StageError> {
        invoke_with_retry(&*self.llm, prompt, self.max_retries)
            .await
            .map_err(|e| StageError::new(stage, e.stage_kind(), e.to_string()))
    }

    /// Generated text parsed as a JSON list of strings.
    pub async fn list(&self, stage: &str, prompt: &str) -> Result<Vec<String>, StageError> {
        let raw = self.text(stage, prompt).await?;
        extract_list(&raw)
            .map_err(|e| StageError::new(stage, StageErrorKind::MalformedResponse, e.to_string()))
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
