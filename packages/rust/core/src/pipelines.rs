//! The two pipelines assembled from the stages.
//!
//! Paper: `fetch → chunk → select → {keywords ∥ references} → summarize →
//! preprocess → write`. Abstract search: `search → abstract_keywords →
//! write_articles`.

use std::sync::Arc;

use paperpipe_crawler::DocumentSource;
use paperpipe_discovery::ArticleSearch;
use paperpipe_llm::TextGenerator;
use paperpipe_shared::PipelineConfig;
use paperpipe_storage::{Storage, VectorStore};

use crate::orchestrator::{Pipeline, PipelineError, Stage};
use crate::prompts::Prompts;
use crate::stages::{
    AbstractKeywordStage, AnchoredExtractor, ArticleWriterStage, ChunkSelector, ChunkStage,
    ChunkWriter, FetchStage, Generation, Preprocessor, SearchStage, Summarizer,
};

/// Collaborators of the paper pipeline.
pub struct PaperDeps {
    pub generator: Arc<dyn TextGenerator>,
    pub source: Arc<dyn DocumentSource>,
    pub store: Arc<dyn VectorStore>,
}

pub fn paper_pipeline(
    deps: PaperDeps,
    config: &PipelineConfig,
    prompts: &Prompts,
) -> Result<Pipeline, PipelineError> {
    if config.keyword_anchors.is_empty() || config.reference_anchors.is_empty() {
        return Err(PipelineError::Configuration(
            "anchor candidate lists must not be empty".into(),
        ));
    }
    let generation = Generation::new(deps.generator, config.max_retries);

    let keywords: Arc<dyn Stage> = Arc::new(AnchoredExtractor::keywords(
        generation.clone(),
        prompts.keywords.clone(),
        config.keyword_anchors.clone(),
        config.summary_max_chars,
    ));
    let references: Arc<dyn Stage> = Arc::new(AnchoredExtractor::references(
        generation.clone(),
        prompts.references.clone(),
        config.reference_anchors.clone(),
        config.summary_max_chars,
    ));

    Pipeline::builder("paper")
        .then(FetchStage::new(deps.source))
        .then(ChunkStage)
        .then(ChunkSelector::new(generation.clone(), prompts.selection.clone()))
        .fan_out(vec![keywords, references])
        .concurrent_branches(config.fan_out)
        .then(Summarizer::new(
            generation,
            prompts.summary.clone(),
            config.summary_max_chars,
        ))
        .then(Preprocessor)
        .then(ChunkWriter::new(deps.store))
        .build()
}

pub fn abstract_pipeline(
    generator: Arc<dyn TextGenerator>,
    search: Arc<dyn ArticleSearch>,
    storage: Arc<Storage>,
    config: &PipelineConfig,
    prompts: &Prompts,
) -> Result<Pipeline, PipelineError> {
    let generation = Generation::new(generator, config.max_retries);
    Pipeline::builder("abstracts")
        .then(SearchStage::new(search))
        .then(AbstractKeywordStage::new(generation, prompts.keywords.clone()))
        .then(ArticleWriterStage::new(storage))
        .build()
}
