//! Case-parallel ingestion of an input tree.
//!
//! The manager lists the top-level case directories (ten-digit names) after
//! its cursor and hands each to a pool thread. A worker owns its case's scan,
//! sink and scratch slice, so workers share nothing but the cancellation
//! token and the statistics map.

mod search;

use std::path::Path;
use std::time::Instant;

use glob::Pattern;
use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::archive::Extractor;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::fields::{FieldRules, NodeFields};
use crate::incremental::{list_unscanned_entries, ManagerScan, ScanSettings, WorkerScan};
use crate::paths::Entry;
use crate::progress::IngestReporter;
use crate::sink::SinkFactory;
use crate::stats::{CaseStats, IngestStats};

pub use search::{unzip_into_scratch_dir, CaseSearch};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Worker threads. `None` uses one per CPU.
    pub processors: Option<usize>,
    pub settings: ScanSettings,
    pub extractor: Extractor,
    /// Globs matched against absolute paths. Matching entries are skipped.
    pub ignore_patterns: Vec<String>,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub struct IngestReport {
    pub stats: IngestStats,
    pub cases_dispatched: usize,
    pub cancelled: bool,
}

/// Shared, read-only state handed to every worker.
struct RunContext<'a> {
    rules: &'a FieldRules,
    extractor: &'a Extractor,
    ignore_patterns: &'a [Pattern],
    cancel: &'a CancelToken,
    sinks: &'a dyn SinkFactory,
}

fn compile_ignore_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Ingests every case directory under `input_dir` that has not been fully
/// scanned, resuming from the history in `history_dir`.
///
/// `input_dir` is never written to. `scratch_dir` and `history_dir` are owned
/// by the run. The first worker error cancels the remaining workers and is
/// returned; the manager history is left as it was in that case.
pub fn ingest_log_files(
    input_dir: &Path,
    scratch_dir: &Path,
    history_dir: &Path,
    sinks: &dyn SinkFactory,
    reporter: &dyn IngestReporter,
    options: &IngestOptions,
) -> Result<IngestReport> {
    if !input_dir.is_dir() {
        return Err(Error::precondition(format!(
            "Input must exist and be a directory: {}",
            input_dir.display()
        )));
    }
    let start = Instant::now();
    let rules = FieldRules::new()?;
    let ignore_patterns = compile_ignore_patterns(&options.ignore_patterns);
    let mut manager = ManagerScan::new(input_dir, history_dir, scratch_dir, options.settings)?;

    let root = Entry::root(manager.input_dir());
    let mut cases = Vec::new();
    for entry in list_unscanned_entries(&root, manager.last_path()?)? {
        if !entry.is_dir() {
            debug!("Ignored non-StorageGRID file: {}", entry);
        } else if rules.is_case_number(&entry.basename()) {
            debug!("Search case directory: {}", entry);
            cases.push(entry.basename());
        } else {
            debug!("Ignored non-StorageGRID directory: {}", entry);
        }
    }
    info!("Ingesting {} case directories from {}", cases.len(), input_dir.display());
    reporter.on_ingest_start(cases.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.processors.unwrap_or(0))
        .build()?;
    let stats = IngestStats::new();
    let context = RunContext {
        rules: &rules,
        extractor: &options.extractor,
        ignore_patterns: &ignore_patterns,
        cancel: &options.cancel,
        sinks,
    };

    let manager_ref = &manager;
    let outcome: Result<()> = pool.install(|| {
        cases.par_iter().try_for_each(|case_num| {
            if options.cancel.is_cancelled() {
                return Ok(());
            }
            reporter.on_case_start(case_num);
            match search_case_directory(manager_ref, case_num, &context) {
                Ok(case_stats) => {
                    stats.record(case_num, case_stats);
                    reporter.on_case_complete(case_num, &case_stats);
                    Ok(())
                }
                Err(e) => {
                    error!("Case {} failed: {}", case_num, e);
                    options.cancel.cancel();
                    Err(e)
                }
            }
        })
    });
    outcome?;

    let cancelled = options.cancel.is_cancelled();
    if cancelled {
        info!("Gracefully aborting");
        manager.premature_exit(&cases)?;
    } else {
        manager.complete_scan()?;
    }
    reporter.on_ingest_complete(cases.len(), start.elapsed().as_secs_f64());

    Ok(IngestReport {
        stats,
        cases_dispatched: cases.len(),
        cancelled,
    })
}

/// Scans one case directory with its own history, sink and scratch slice.
/// A case whose history says it already finished is skipped.
fn search_case_directory(manager: &ManagerScan, case_num: &str, context: &RunContext<'_>) -> Result<CaseStats> {
    if context.cancel.is_cancelled() {
        return Ok(CaseStats::default());
    }

    let mut worker = WorkerScan::new(manager, case_num)?;
    if worker.already_scanned() {
        debug!("Case {} already scanned, skipping", case_num);
        return Ok(CaseStats::default());
    }

    let mut sink = context.sinks.open(case_num)?;
    let mut search = CaseSearch {
        rules: context.rules,
        extractor: context.extractor,
        ignore_patterns: context.ignore_patterns,
        cancel: context.cancel,
        sink: sink.as_mut(),
        stats: CaseStats::default(),
    };

    let case_dir = Entry::new(manager.input_dir(), case_num);
    debug!("Recursing into case directory: {}", case_dir);
    search.recursive_search(worker.scan_mut()?, &NodeFields::for_case(case_num), &case_dir)?;
    let case_stats = search.stats;

    if context.cancel.is_cancelled() {
        worker.premature_exit()?;
    } else {
        worker.complete_scan()?;
    }
    Ok(case_stats)
}
