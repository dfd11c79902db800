//! Stage trait and the pipeline orchestrator.
//!
//! A [`Pipeline`] is a fixed sequence of steps built once with
//! [`PipelineBuilder`]. A step is either a single stage or a fan-out of
//! independent stages that run on clones of the record and are merged back
//! in declaration order. Each stage runs in its own task: a stage that
//! panics ends the run with [`PipelineError::StageAborted`], while ordinary
//! stage failures are appended to the record and the run continues.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use paperpipe_shared::{PipelineRecord, StageError};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One isolated transformation of a [`PipelineRecord`].
///
/// A stage may push several errors onto the record itself; a returned
/// `Err` is appended by the orchestrator. Either way the run continues.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError>;
}

// ---------------------------------------------------------------------------
// Errors and progress
// ---------------------------------------------------------------------------

/// Hard failures, distinct from the soft per-stage errors on the record.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The pipeline could not be constructed; nothing ran.
    #[error("pipeline configuration error: {0}")]
    Configuration(String),

    /// A stage escaped its isolation boundary.
    #[error("stage '{stage}' aborted: {message}")]
    StageAborted { stage: String, message: String },
}

impl From<paperpipe_shared::PaperpipeError> for PipelineError {
    fn from(err: paperpipe_shared::PaperpipeError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a stage runs. `step` is 1-based.
    fn stage_started(&self, stage: &str, step: usize, total: usize);
    /// Called after a stage returns, with the errors it added.
    fn stage_finished(&self, stage: &str, new_errors: usize);
    /// Called when the run completes.
    fn done(&self, record: &PipelineRecord);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: &str, _step: usize, _total: usize) {}
    fn stage_finished(&self, _stage: &str, _new_errors: usize) {}
    fn done(&self, _record: &PipelineRecord) {}
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

enum Step {
    Single(Arc<dyn Stage>),
    FanOut(Vec<Arc<dyn Stage>>),
}

impl Step {
    fn names(&self) -> Vec<&'static str> {
        match self {
            Step::Single(stage) => vec![stage.name()],
            Step::FanOut(stages) => stages.iter().map(|s| s.name()).collect(),
        }
    }
}

pub struct PipelineBuilder {
    name: &'static str,
    steps: Vec<Step>,
    concurrent_branches: bool,
}

impl PipelineBuilder {
    /// Append a stage.
    pub fn then(mut self, stage: impl Stage) -> Self {
        self.steps.push(Step::Single(Arc::new(stage)));
        self
    }

    /// Append independent stages that each see the record as it is now.
    pub fn fan_out(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.steps.push(Step::FanOut(stages));
        self
    }

    /// Run fan-out branches concurrently (default) or one after another in
    /// declaration order.
    pub fn concurrent_branches(mut self, concurrent: bool) -> Self {
        self.concurrent_branches = concurrent;
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.steps.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "pipeline '{}' has no stages",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if matches!(step, Step::FanOut(stages) if stages.is_empty()) {
                return Err(PipelineError::Configuration(format!(
                    "pipeline '{}' has an empty fan-out",
                    self.name
                )));
            }
            for name in step.names() {
                if !seen.insert(name) {
                    return Err(PipelineError::Configuration(format!(
                        "pipeline '{}' declares stage '{name}' twice",
                        self.name
                    )));
                }
            }
        }
        Ok(Pipeline {
            name: self.name,
            steps: self.steps,
            concurrent_branches: self.concurrent_branches,
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    name: &'static str,
    steps: Vec<Step>,
    concurrent_branches: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("concurrent_branches", &self.concurrent_branches)
            .finish()
    }
}

impl Pipeline {
    pub fn builder(name: &'static str) -> PipelineBuilder {
        PipelineBuilder {
            name,
            steps: Vec::new(),
            concurrent_branches: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stage names in execution order; fan-out members in declaration order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.steps.iter().flat_map(Step::names).collect()
    }

    /// Run every step over `record`. Soft failures end up in the returned
    /// record's error list; only a panicking stage is an `Err`.
    #[instrument(skip_all, fields(pipeline = self.name, source = %record.source_locator(), run_id = %record.run_id()))]
    pub async fn run(
        &self,
        mut record: PipelineRecord,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineRecord, PipelineError> {
        let started = Instant::now();
        let total = self.stage_names().len();
        let mut step_no = 0;

        info!(stages = total, "pipeline started");

        for step in &self.steps {
            match step {
                Step::Single(stage) => {
                    step_no += 1;
                    progress.stage_started(stage.name(), step_no, total);
                    let before = record.errors().len();
                    record = run_isolated(Arc::clone(stage), record).await?;
                    let added = record.errors().len() - before;
                    log_stage(stage.name(), added);
                    progress.stage_finished(stage.name(), added);
                }
                Step::FanOut(stages) => {
                    for stage in stages {
                        step_no += 1;
                        progress.stage_started(stage.name(), step_no, total);
                    }
                    let base_errors = record.errors().len();
                    let branches = if self.concurrent_branches {
                        self.run_concurrent(stages, &record).await?
                    } else {
                        self.run_sequential(stages, &record).await?
                    };
                    for (stage, branch) in stages.iter().zip(branches) {
                        let added = branch.errors().len() - base_errors;
                        record.merge_branch(branch, base_errors);
                        log_stage(stage.name(), added);
                        progress.stage_finished(stage.name(), added);
                    }
                }
            }
        }

        info!(
            errors = record.errors().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline completed"
        );
        progress.done(&record);
        Ok(record)
    }

    async fn run_concurrent(
        &self,
        stages: &[Arc<dyn Stage>],
        record: &PipelineRecord,
    ) -> Result<Vec<PipelineRecord>, PipelineError> {
        let handles: Vec<_> = stages
            .iter()
            .map(|stage| {
                let stage = Arc::clone(stage);
                let branch = record.clone();
                tokio::spawn(async move {
                    let mut branch = branch;
                    let result = stage.run(&mut branch).await;
                    (branch, result)
                })
            })
            .collect();

        let mut branches = Vec::with_capacity(handles.len());
        let mut pending = stages.iter().zip(handles);
        while let Some((stage, handle)) = pending.next() {
            match finish_isolated(stage.name(), handle.await) {
                Ok(branch) => branches.push(branch),
                Err(err) => {
                    for (_, sibling) in pending.by_ref() {
                        sibling.abort();
                    }
                    return Err(err);
                }
            }
        }
        Ok(branches)
    }

    async fn run_sequential(
        &self,
        stages: &[Arc<dyn Stage>],
        record: &PipelineRecord,
    ) -> Result<Vec<PipelineRecord>, PipelineError> {
        let mut branches = Vec::with_capacity(stages.len());
        for stage in stages {
            branches.push(run_isolated(Arc::clone(stage), record.clone()).await?);
        }
        Ok(branches)
    }
}

/// Run one stage in its own task so a panic cannot take down the caller.
async fn run_isolated(
    stage: Arc<dyn Stage>,
    record: PipelineRecord,
) -> Result<PipelineRecord, PipelineError> {
    let name = stage.name();
    debug!(stage = name, "stage started");
    let handle = tokio::spawn(async move {
        let mut record = record;
        let result = stage.run(&mut record).await;
        (record, result)
    });
    finish_isolated(name, handle.await)
}

fn finish_isolated(
    name: &'static str,
    joined: Result<(PipelineRecord, Result<(), StageError>), tokio::task::JoinError>,
) -> Result<PipelineRecord, PipelineError> {
    match joined {
        Ok((record, Ok(()))) => Ok(record),
        Ok((mut record, Err(err))) => {
            record.push_error(err);
            Ok(record)
        }
        Err(join_err) => {
            warn!(stage = name, error = %join_err, "stage aborted");
            Err(PipelineError::StageAborted {
                stage: name.to_string(),
                message: join_err.to_string(),
            })
        }
    }
}

fn log_stage(stage: &str, new_errors: usize) {
    if new_errors == 0 {
        debug!(stage, "stage finished");
    } else {
        warn!(stage, errors = new_errors, "stage finished with errors");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperpipe_shared::StageErrorKind;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Adds a keyword, optionally failing or panicking.
    struct Tagger {
        name: &'static str,
        keyword: &'static str,
        fail: bool,
        panic: bool,
        delay_ms: u64,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Tagger {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                keyword: name,
                fail: false,
                panic: false,
                delay_ms: 0,
                log: Arc::clone(log),
            }
        }
    }

    #[async_trait]
    impl Stage for Tagger {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, record: &mut PipelineRecord) -> Result<(), StageError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.log.lock().unwrap().push(self.name);
            if self.panic {
                panic!("stage {} exploded", self.name);
            }
            record.keywords.insert(self.keyword.to_string());
            if self.fail {
                return Err(StageError::new(self.name, StageErrorKind::Provider, "boom"));
            }
            Ok(())
        }
    }

    fn log() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn runs_stages_in_order_and_keeps_going_after_errors() {
        let log = log();
        let pipeline = Pipeline::builder("test")
            .then(Tagger::new("a", &log))
            .then(Tagger {
                fail: true,
                ..Tagger::new("b", &log)
            })
            .then(Tagger::new("c", &log))
            .build()
            .unwrap();

        let record = pipeline
            .run(PipelineRecord::new("doc"), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(record.errors().len(), 1);
        assert_eq!(record.errors()[0].stage, "b");
        assert_eq!(record.keywords.len(), 3);
    }

    #[tokio::test]
    async fn fan_out_merges_in_declaration_order() {
        let log = log();
        let pipeline = Pipeline::builder("test")
            .then(Tagger::new("first", &log))
            .fan_out(vec![
                Arc::new(Tagger {
                    fail: true,
                    delay_ms: 30,
                    ..Tagger::new("slow", &log)
                }),
                Arc::new(Tagger {
                    fail: true,
                    ..Tagger::new("fast", &log)
                }),
            ])
            .then(Tagger::new("last", &log))
            .build()
            .unwrap();

        let record = pipeline
            .run(PipelineRecord::new("doc"), &SilentProgress)
            .await
            .unwrap();

        let stages: Vec<_> = record.errors().iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(stages, vec!["slow", "fast"]);
        assert!(record.keywords.contains("slow") && record.keywords.contains("fast"));
        assert_eq!(log.lock().unwrap().last(), Some(&"last"));
    }

    #[tokio::test]
    async fn sequential_branches_run_in_declaration_order() {
        let log = log();
        let pipeline = Pipeline::builder("test")
            .fan_out(vec![
                Arc::new(Tagger {
                    delay_ms: 20,
                    ..Tagger::new("x", &log)
                }),
                Arc::new(Tagger::new("y", &log)),
            ])
            .concurrent_branches(false)
            .build()
            .unwrap();

        pipeline
            .run(PipelineRecord::new("doc"), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn panicking_stage_is_hard_failure() {
        let log = log();
        let pipeline = Pipeline::builder("test")
            .then(Tagger {
                panic: true,
                ..Tagger::new("bad", &log)
            })
            .then(Tagger::new("never", &log))
            .build()
            .unwrap();

        let err = pipeline
            .run(PipelineRecord::new("doc"), &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StageAborted { ref stage, .. } if stage == "bad"));
        assert_eq!(*log.lock().unwrap(), vec!["bad"]);
    }

    #[tokio::test]
    async fn panicking_branch_aborts_its_siblings() {
        let log = log();
        let pipeline = Pipeline::builder("test")
            .fan_out(vec![
                Arc::new(Tagger {
                    panic: true,
                    ..Tagger::new("bad", &log)
                }),
                Arc::new(Tagger {
                    delay_ms: 200,
                    ..Tagger::new("slow", &log)
                }),
            ])
            .build()
            .unwrap();

        let err = pipeline
            .run(PipelineRecord::new("doc"), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageAborted { ref stage, .. } if stage == "bad"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*log.lock().unwrap(), vec!["bad"]);
    }

    #[test]
    fn builder_rejects_bad_graphs() {
        assert!(Pipeline::builder("empty").build().is_err());
        assert!(Pipeline::builder("fan").fan_out(vec![]).build().is_err());

        let log = log();
        let dup = Pipeline::builder("dup")
            .then(Tagger::new("a", &log))
            .then(Tagger::new("a", &log))
            .build();
        assert!(matches!(dup, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn stage_names_flatten_fan_out() {
        let log = log();
        let pipeline = Pipeline::builder("names")
            .then(Tagger::new("a", &log))
            .fan_out(vec![Arc::new(Tagger::new("b", &log)), Arc::new(Tagger::new("c", &log))])
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);
    }
}
