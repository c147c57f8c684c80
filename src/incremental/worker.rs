use std::path::{Path, PathBuf};

use tracing::debug;

use super::scan::ScanParams;
use super::{ManagerScan, Scan};
use crate::error::{Error, Result};
use crate::platform;

/// Scan of a single case directory, with its own history files and its own
/// slice of scratch space (`<scratch>/worker-<case>`).
#[derive(Debug)]
pub struct WorkerScan {
    case_num: String,
    scratch_dir: PathBuf,
    log_file: PathBuf,
    scan: Option<Scan>,
}

impl WorkerScan {
    /// Opens the scan for `case_num`. A case whose history says it already
    /// finished is opened in the closed state and touches nothing on disk.
    ///
    /// A case with no history of its own starts from the manager's window.
    pub fn new(manager: &ManagerScan, case_num: &str) -> Result<Self> {
        let (active_file, log_file) = manager.worker_history_files(case_num);
        let scratch_dir = manager.scratch_dir().join(format!("worker-{case_num}"));

        if active_file.exists() && !log_file.exists() {
            debug!("Case {} was already scanned", case_num);
            return Ok(Self {
                case_num: case_num.to_string(),
                scratch_dir,
                log_file,
                scan: None,
            });
        }

        let active_name = format!("{case_num}.txt");
        let log_name = format!("{case_num}-log.txt");
        let scan = Scan::open(ScanParams {
            input_dir: manager.input_dir(),
            history_dir: manager.history_dir(),
            scratch_dir: &scratch_dir,
            active_name: &active_name,
            log_name: &log_name,
            safe_time: manager.safe_time(),
            default_period: manager.time_period()?,
            settings: manager.settings(),
        })?;

        Ok(Self {
            case_num: case_num.to_string(),
            scratch_dir,
            log_file,
            scan: Some(scan),
        })
    }

    pub fn case_num(&self) -> &str {
        &self.case_num
    }

    pub fn already_scanned(&self) -> bool {
        self.scan.is_none()
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn scan(&self) -> Result<&Scan> {
        self.scan.as_ref().ok_or(Error::ScanClosed)
    }

    pub fn scan_mut(&mut self) -> Result<&mut Scan> {
        self.scan.as_mut().ok_or(Error::ScanClosed)
    }

    /// Marks the case finished. Removing the log file is what tells the
    /// manager this case is done.
    pub fn complete_scan(&mut self) -> Result<()> {
        self.scan_mut()?.complete_scan()?;
        platform::delete_file(&self.log_file)?;
        self.remove_scratch()
    }

    pub fn premature_exit(&mut self) -> Result<()> {
        self.scan_mut()?.premature_exit()?;
        self.remove_scratch()
    }

    fn remove_scratch(&self) -> Result<()> {
        if self.scratch_dir.exists() {
            platform::delete_directory(&self.scratch_dir)?;
        }
        Ok(())
    }
}
