use crate::stats::CaseStats;

/// Receives ingestion progress events.
///
/// The CLI implements this with indicatif. All methods default to no-ops and
/// may be called from several worker threads at once.
pub trait IngestReporter: Send + Sync {
    fn on_ingest_start(&self, _cases: usize) {}
    fn on_case_start(&self, _case_num: &str) {}
    fn on_case_complete(&self, _case_num: &str, _stats: &CaseStats) {}
    fn on_ingest_complete(&self, _cases: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl IngestReporter for SilentReporter {}
