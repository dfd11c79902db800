//! Bounded worker pool for recursive crawls.
//!
//! The coordinator owns the [`CrawlSession`] and is the only place where
//! locators and item identities are checked and recorded. Workers only run
//! the [`CrawlHandler`]; a fixed number of them pull from a bounded job
//! channel, so at most `concurrency` tasks are ever in flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument, warn};

use paperpipe_shared::Result;

use crate::session::CrawlSession;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A unit of crawl work: a locator (URL or search query) at some depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    pub locator: String,
    pub depth: u32,
}

/// What a task produced.
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    /// Extracted items; deduplicated by the session's identity rule.
    pub items: Vec<Value>,
    /// Locators to crawl at `depth + 1`.
    pub expansions: Vec<String>,
}

/// Work performed for each admitted task.
#[async_trait]
pub trait CrawlHandler: Send + Sync + 'static {
    async fn process(&self, task: &CrawlTask) -> Result<TaskOutput>;
}

/// Summary of a completed crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Tasks that completed successfully.
    pub processed: usize,
    /// Tasks that failed or panicked (locator, error).
    pub failed: Vec<(String, String)>,
    /// Candidate locators rejected because they were already seen.
    pub duplicate_locators: usize,
    /// Expansions dropped because the depth limit was reached.
    pub depth_limited: usize,
    pub items_added: usize,
    pub duplicate_items: usize,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// CrawlCoordinator
// ---------------------------------------------------------------------------

type Outcome = (CrawlTask, std::result::Result<TaskOutput, String>);

pub struct CrawlCoordinator<H: CrawlHandler> {
    handler: Arc<H>,
    concurrency: usize,
    max_depth: u32,
}

impl<H: CrawlHandler> CrawlCoordinator<H> {
    /// `concurrency` is clamped to at least one worker.
    pub fn new(handler: Arc<H>, concurrency: usize, max_depth: u32) -> Self {
        Self {
            handler,
            concurrency: concurrency.max(1),
            max_depth,
        }
    }

    /// Crawl from `seeds` (depth 0) until no admitted work remains.
    #[instrument(skip_all, fields(concurrency = self.concurrency, max_depth = self.max_depth))]
    pub async fn run<I>(&self, seeds: I, session: &mut CrawlSession) -> CrawlReport
    where
        I: IntoIterator<Item = String>,
    {
        let started = Instant::now();
        let mut report = CrawlReport::default();
        let mut backlog = VecDeque::new();

        for seed in seeds {
            self.admit(seed, 0, session, &mut backlog, &mut report);
        }
        info!(seeds = backlog.len(), "starting crawl");

        let (job_tx, job_rx) = mpsc::channel::<CrawlTask>(self.concurrency);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Outcome>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers: Vec<_> = (0..self.concurrency)
            .map(|worker_id| {
                let handler = Arc::clone(&self.handler);
                let jobs = Arc::clone(&job_rx);
                let done = done_tx.clone();
                tokio::spawn(worker_loop(worker_id, handler, jobs, done))
            })
            .collect();
        drop(done_tx);

        let mut in_flight = 0usize;
        loop {
            while in_flight < self.concurrency {
                let Some(task) = backlog.pop_front() else {
                    break;
                };
                if job_tx.send(task).await.is_err() {
                    warn!("crawl workers stopped early");
                    break;
                }
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }

            let Some((task, outcome)) = done_rx.recv().await else {
                break;
            };
            in_flight -= 1;

            match outcome {
                Ok(output) => {
                    report.processed += 1;
                    for item in output.items {
                        if session.admit_item(item) {
                            report.items_added += 1;
                        } else {
                            report.duplicate_items += 1;
                        }
                    }
                    if task.depth >= self.max_depth {
                        report.depth_limited += output.expansions.len();
                    } else {
                        for expansion in output.expansions {
                            self.admit(expansion, task.depth + 1, session, &mut backlog, &mut report);
                        }
                    }
                }
                Err(e) => {
                    warn!(locator = %task.locator, depth = task.depth, error = %e, "crawl task failed");
                    report.failed.push((task.locator, e));
                }
            }
        }

        drop(job_tx);
        for worker in workers {
            let _ = worker.await;
        }

        report.duration = started.elapsed();
        info!(
            processed = report.processed,
            failed = report.failed.len(),
            items = report.items_added,
            duplicates = report.duplicate_locators,
            duration_ms = report.duration.as_millis() as u64,
            "crawl complete"
        );
        report
    }

    fn admit(
        &self,
        locator: String,
        depth: u32,
        session: &mut CrawlSession,
        backlog: &mut VecDeque<CrawlTask>,
        report: &mut CrawlReport,
    ) {
        let locator = locator.trim().to_string();
        if locator.is_empty() {
            return;
        }
        if !session.mark_visited(&locator) {
            debug!(%locator, "already visited, skipping");
            report.duplicate_locators += 1;
            return;
        }
        backlog.push_back(CrawlTask { locator, depth });
    }
}

async fn worker_loop<H: CrawlHandler>(
    worker_id: usize,
    handler: Arc<H>,
    jobs: Arc<Mutex<mpsc::Receiver<CrawlTask>>>,
    done: mpsc::UnboundedSender<Outcome>,
) {
    loop {
        let task = { jobs.lock().await.recv().await };
        let Some(task) = task else {
            break;
        };
        debug!(worker_id, locator = %task.locator, depth = task.depth, "processing");

        let handler = Arc::clone(&handler);
        let job = task.clone();
        // A panicking handler fails its task, not the worker.
        let outcome = match tokio::spawn(async move { handler.process(&job).await }).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("task panicked: {e}")),
        };
        if done.send((task, outcome)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperpipe_shared::PaperpipeError;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed graph: locator -> (items, expansions).
    #[derive(Default)]
    struct GraphHandler {
        graph: HashMap<String, (Vec<Value>, Vec<String>)>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GraphHandler {
        fn node(mut self, locator: &str, items: Vec<Value>, expansions: &[&str]) -> Self {
            self.graph.insert(
                locator.to_string(),
                (items, expansions.iter().map(|s| s.to_string()).collect()),
            );
            self
        }
    }

    #[async_trait]
    impl CrawlHandler for GraphHandler {
        async fn process(&self, task: &CrawlTask) -> Result<TaskOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            match task.locator.as_str() {
                "boom" => panic!("handler panic"),
                "fail" => Err(PaperpipeError::Network("fail: HTTP 503".into())),
                other => {
                    let (items, expansions) = self.graph.get(other).cloned().unwrap_or_default();
                    Ok(TaskOutput { items, expansions })
                }
            }
        }
    }

    #[tokio::test]
    async fn duplicate_seed_processed_once() {
        let handler = Arc::new(GraphHandler::default());
        let coordinator = CrawlCoordinator::new(Arc::clone(&handler), 2, 1);
        let mut session = CrawlSession::new();

        let report = coordinator
            .run(["llm".to_string(), "llm".to_string()], &mut session)
            .await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.duplicate_locators, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expansions_respect_depth_and_dedup() {
        let handler = Arc::new(
            GraphHandler::default()
                .node("a", vec![], &["b", "c", "a"])
                .node("b", vec![], &["d"])
                .node("c", vec![], &["d"]),
        );
        let coordinator = CrawlCoordinator::new(Arc::clone(&handler), 3, 1);
        let mut session = CrawlSession::new();

        let report = coordinator.run(["a".to_string()], &mut session).await;

        // a at depth 0; b and c at depth 1; d would be depth 2.
        assert_eq!(report.processed, 3);
        assert_eq!(report.duplicate_locators, 1);
        assert_eq!(report.depth_limited, 2);
        assert!(!session.is_visited("d"));
    }

    #[tokio::test]
    async fn items_deduplicated_across_tasks() {
        let handler = Arc::new(
            GraphHandler::default()
                .node("q1", vec![json!({"url": "https://p/1"}), json!({"url": "https://p/2"})], &[])
                .node("q2", vec![json!({"url": "https://p/2"}), json!({"title": "x"})], &[]),
        );
        let coordinator = CrawlCoordinator::new(handler, 1, 0);
        let mut session = CrawlSession::new();

        let report = coordinator
            .run(["q1".to_string(), "q2".to_string()], &mut session)
            .await;

        assert_eq!(report.items_added, 3);
        assert_eq!(report.duplicate_items, 1);
        assert_eq!(session.results().len(), 3);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let handler = Arc::new(GraphHandler::default());
        let coordinator = CrawlCoordinator::new(Arc::clone(&handler), 2, 0);
        let mut session = CrawlSession::new();

        let seeds = (0..8).map(|i| format!("s{i}"));
        let report = coordinator.run(seeds, &mut session).await;

        assert_eq!(report.processed, 8);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failures_and_panics_are_reported() {
        let handler = Arc::new(GraphHandler::default());
        let coordinator = CrawlCoordinator::new(handler, 2, 0);
        let mut session = CrawlSession::new();

        let report = coordinator
            .run(["fail".to_string(), "boom".to_string(), "ok".to_string()], &mut session)
            .await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.iter().any(|(l, e)| l == "boom" && e.contains("panicked")));
    }
}
