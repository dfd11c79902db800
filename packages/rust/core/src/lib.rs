//! Core pipeline orchestration and domain logic for paperpipe.
//!
//! This crate ties together fetching, chunking, text generation and
//! persistence into end-to-end workflows: the paper pipeline, the abstract
//! search pipeline and the scholar crawl.

pub mod orchestrator;
pub mod pipelines;
pub mod prompts;
pub mod scholar;
pub mod schema;
pub mod stages;

pub use orchestrator::{
    Pipeline, PipelineBuilder, PipelineError, ProgressReporter, SilentProgress, Stage,
};
pub use pipelines::{PaperDeps, abstract_pipeline, paper_pipeline};
pub use prompts::Prompts;
pub use scholar::ScholarHandler;
pub use schema::SchemaGenerator;
