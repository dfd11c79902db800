//! indicatif-backed progress reporting.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use paperpipe_core::ProgressReporter;
use paperpipe_shared::PipelineRecord;

/// CLI progress reporter using an indicatif spinner.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    pub(crate) fn message(&self, msg: impl Into<String>) {
        self.spinner.set_message(msg.into());
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: &str, step: usize, total: usize) {
        self.spinner.set_message(format!("[{step}/{total}] {stage}"));
    }

    fn stage_finished(&self, stage: &str, new_errors: usize) {
        if new_errors > 0 {
            self.spinner
                .println(format!("  {stage}: {new_errors} error(s)"));
        }
    }

    fn done(&self, _record: &PipelineRecord) {
        self.finish();
    }
}
