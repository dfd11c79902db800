use std::borrow::Cow;

use async_trait::async_trait;
use tracing::{debug, info};

use paperpipe_shared::{PipelineRecord, SectionKey, Sections, StageError, StageErrorKind};

use super::{Generation, truncate_chars};
use crate::orchestrator::Stage;

/// Which record field an [`AnchoredExtractor`] fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorTarget {
    Keywords,
    References,
}

impl AnchorTarget {
    fn stage_name(self) -> &'static str {
        match self {
            AnchorTarget::Keywords => "keywords",
            AnchorTarget::References => "references",
        }
    }
}

/// Extracts a list from one anchor section, found by substring match
/// against an ordered candidate list.
///
/// Anchors are looked up in the retained sections first. Sections dropped by
/// selection (a reference list usually is) are found by re-chunking the
/// document text.
pub struct AnchoredExtractor {
    target: AnchorTarget,
    generation: Generation,
    prompt: String,
    anchors: Vec<String>,
    max_chars: usize,
}

impl AnchoredExtractor {
    pub fn keywords(
        generation: Generation,
        prompt: impl Into<String>,
        anchors: Vec<String>,
        max_chars: usize,
    ) -> Self {
        Self {
            target: AnchorTarget::Keywords,
            generation,
            prompt: prompt.into(),
            anchors,
            max_chars,
        }
    }

    pub fn references(
        generation: Generation,
        prompt: impl Into<String>,
        anchors: Vec<String>,
        max_chars: usize,
    ) -> Self {
        Self {
            target: AnchorTarget::References,
            ..Self::keywords(generation, prompt, anchors, max_chars)
        }
    }

    /// First key matching the earliest anchor candidate, with its body.
    fn find_anchor<'a>(&self, sections: &'a Sections) -> Option<(&'a SectionKey, &'a str)> {
        self.anchors.iter().find_map(|anchor| {
            sections
                .iter()
                .find(|(key, _)| key.contains(anchor))
        })
    }

    fn anchor_body<'a>(&self, record: &'a PipelineRecord) -> Option<(SectionKey, Cow<'a, str>)> {
        if let Some((key, body)) = self.find_anchor(&record.sections) {
            return Some((key.clone(), Cow::Borrowed(body)));
        }
        let full = paperpipe_markdown::chunk(record.raw_text.as_deref()?);
        self.find_anchor(&full)
            .map(|(key, body)| (key.clone(), Cow::Owned(body.to_string())))
    }
}

#[async_trait]
impl Stage for AnchoredExtractor {
    fn name(&self) -> &'static str {
        self.target.stage_name()
    }

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
        let Some((key, body)) = self.anchor_body(record) else {
            return Err(StageError::new(
                self.name(),
                StageErrorKind::MissingAnchor,
                format!("no section matches any of {:?}", self.anchors),
            ));
        };
        debug!(anchor = %key, "anchor section found");

        let prompt = format!("{}\n{}", self.prompt, truncate_chars(&body, self.max_chars));
        drop(body);
        let items = self.generation.list(self.name(), &prompt).await?;

        let field = match self.target {
            AnchorTarget::Keywords => &mut record.keywords,
            AnchorTarget::References => &mut record.references,
        };
        field.extend(items);
        info!(anchor = %key, count = field.len(), "items extracted");
        Ok(())
    }
}
