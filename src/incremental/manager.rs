use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Scan, ScanSettings};
use crate::error::Result;
use crate::platform;

/// The top-level scan over case directories. Each case is scanned by its own
/// [`WorkerScan`](super::WorkerScan), and the manager folds their per-case
/// history back into its own cursor.
#[derive(Debug)]
pub struct ManagerScan {
    scan: Scan,
}

impl Deref for ManagerScan {
    type Target = Scan;

    fn deref(&self) -> &Scan {
        &self.scan
    }
}

impl ManagerScan {
    pub fn new(
        input_dir: &Path,
        history_dir: &Path,
        scratch_dir: &Path,
        settings: ScanSettings,
    ) -> Result<Self> {
        Ok(Self {
            scan: Scan::new(input_dir, history_dir, scratch_dir, settings)?,
        })
    }

    /// Active and log history file paths for a case.
    pub fn worker_history_files(&self, case_num: &str) -> (PathBuf, PathBuf) {
        (
            self.history_dir().join(format!("{case_num}.txt")),
            self.history_dir().join(format!("{case_num}-log.txt")),
        )
    }

    /// A case finished when its active file is present and its log is gone.
    pub fn case_finished(&self, case_num: &str) -> bool {
        let (active, log) = self.worker_history_files(case_num);
        active.exists() && !log.exists()
    }

    /// Records the whole scan as finished and removes every per-case history
    /// file, which only matters while a scan is in progress.
    pub fn complete_scan(&mut self) -> Result<()> {
        self.scan.complete_scan()?;

        for entry in fs::read_dir(self.history_dir())? {
            let path = entry?.path();
            if is_worker_history_file(&path) {
                debug!("Removing worker history {}", path.display());
                platform::delete_file(&path)?;
            }
        }
        info!("Scan of {} complete", self.input_dir().display());
        Ok(())
    }

    /// Stops early. `dispatched_cases` must be in traversal order. Leading
    /// cases that finished are folded into the manager cursor and their
    /// history removed. The first unfinished case stops the fold, because the
    /// cursor can only cover a contiguous prefix.
    pub fn premature_exit(&mut self, dispatched_cases: &[String]) -> Result<()> {
        for case_num in dispatched_cases {
            if !self.case_finished(case_num) {
                debug!("Case {} did not finish, stopping reconciliation", case_num);
                break;
            }
            let (active, _) = self.worker_history_files(case_num);
            platform::delete_file(&active)?;
            self.scan.set_last_path(case_num.as_str())?;
        }
        self.scan.premature_exit()
    }
}

/// Worker files are named after the case number: `<case>.txt` or
/// `<case>-log.txt`.
fn is_worker_history_file(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let case_num = stem.strip_suffix("-log").unwrap_or(stem);
    !case_num.is_empty() && case_num.parse::<u64>().is_ok()
}
