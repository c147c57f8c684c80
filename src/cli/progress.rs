use indicatif::{ProgressBar, ProgressStyle};
use logjam_ingest::{CaseStats, IngestReporter};
use std::sync::Mutex;

/// CLI progress reporter: one bar ticking per finished case directory.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl IngestReporter for CliReporter {
    fn on_ingest_start(&self, cases: usize) {
        let pb = ProgressBar::new(cases as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Ingesting [{bar:30.cyan/dim}] {pos}/{len} cases {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn on_case_start(&self, case_num: &str) {
        self.with_bar(|pb| pb.set_message(case_num.to_string()));
    }

    fn on_case_complete(&self, _case_num: &str, _stats: &CaseStats) {
        self.with_bar(|pb| pb.inc(1));
    }

    fn on_ingest_complete(&self, cases: usize, duration_secs: f64) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
        eprintln!(
            "  \x1b[32m✓\x1b[0m Ingest complete: {} cases in {:.2}s",
            cases, duration_secs
        );
    }
}
