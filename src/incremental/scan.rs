use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{
    append_scan_record, extract_last_scan_record, list_unscanned_entries, now,
    overwrite_scan_record, ScanRecord, ScanSettings, TimePeriod,
};
use crate::error::{Error, Result};
use crate::paths::Entry;

#[derive(Debug)]
struct ActiveScan {
    time_period: TimePeriod,
    last_path: String,
    last_history_update: i64,
}

#[derive(Debug)]
enum ScanState {
    Active(ActiveScan),
    Closed,
}

/// An in-progress scan of one input directory.
///
/// Once completed or exited the scan is closed and every further operation
/// fails with [`Error::ScanClosed`].
#[derive(Debug)]
pub struct Scan {
    input_dir: PathBuf,
    history_dir: PathBuf,
    scratch_dir: PathBuf,
    active_file: PathBuf,
    log_file: PathBuf,
    safe_time: i64,
    settings: ScanSettings,
    state: ScanState,
}

pub(super) struct ScanParams<'a> {
    pub input_dir: &'a Path,
    pub history_dir: &'a Path,
    pub scratch_dir: &'a Path,
    pub active_name: &'a str,
    pub log_name: &'a str,
    pub safe_time: i64,
    pub default_period: TimePeriod,
    pub settings: ScanSettings,
}

impl Scan {
    pub const ACTIVE_FILE: &'static str = "scan-history-active.txt";
    pub const LOG_FILE: &'static str = "scan-history-log.txt";

    /// Opens a top-level scan using the standard history file names. The
    /// window starts in 1900 unless the history says otherwise.
    pub fn new(
        input_dir: &Path,
        history_dir: &Path,
        scratch_dir: &Path,
        settings: ScanSettings,
    ) -> Result<Self> {
        let safe_time = now() - settings.safe_time_offset_secs;
        Self::open(ScanParams {
            input_dir,
            history_dir,
            scratch_dir,
            active_name: Self::ACTIVE_FILE,
            log_name: Self::LOG_FILE,
            safe_time,
            default_period: TimePeriod::new(TimePeriod::ancient_history(), safe_time)?,
            settings,
        })
    }

    pub(super) fn open(params: ScanParams<'_>) -> Result<Self> {
        if !params.input_dir.exists() {
            return Err(Error::precondition(format!(
                "Input directory must exist: {}",
                params.input_dir.display()
            )));
        }
        fs::create_dir_all(params.scratch_dir)?;

        let mut scan = Self {
            input_dir: Entry::root(params.input_dir).source().to_path_buf(),
            history_dir: params.history_dir.to_path_buf(),
            scratch_dir: Entry::root(params.scratch_dir).source().to_path_buf(),
            active_file: params.history_dir.join(params.active_name),
            log_file: params.history_dir.join(params.log_name),
            safe_time: params.safe_time,
            settings: params.settings,
            state: ScanState::Active(ActiveScan {
                time_period: params.default_period,
                last_path: String::new(),
                last_history_update: TimePeriod::ancient_history(),
            }),
        };

        let has_history = fs::metadata(&scan.active_file)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if has_history {
            let record = extract_last_scan_record(&scan.active_file)?;
            debug!("Restoring scan from record: {}", record);
            scan.update_from_scan_record(&record)?;
        }

        fs::create_dir_all(&scan.history_dir)?;
        for file in [&scan.active_file, &scan.log_file] {
            OpenOptions::new().create(true).append(true).open(file)?;
        }
        Ok(scan)
    }

    fn active(&self) -> Result<&ActiveScan> {
        match &self.state {
            ScanState::Active(active) => Ok(active),
            ScanState::Closed => Err(Error::ScanClosed),
        }
    }

    fn active_mut(&mut self) -> Result<&mut ActiveScan> {
        match &mut self.state {
            ScanState::Active(active) => Ok(active),
            ScanState::Closed => Err(Error::ScanClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ScanState::Closed)
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn active_file(&self) -> &Path {
        &self.active_file
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn safe_time(&self) -> i64 {
        self.safe_time
    }

    pub fn settings(&self) -> ScanSettings {
        self.settings
    }

    pub fn time_period(&self) -> Result<TimePeriod> {
        Ok(self.active()?.time_period)
    }

    pub fn last_path(&self) -> Result<&str> {
        Ok(&self.active()?.last_path)
    }

    pub(super) fn set_last_path(&mut self, last_path: impl Into<String>) -> Result<()> {
        self.active_mut()?.last_path = last_path.into();
        Ok(())
    }

    /// Adopts an earlier record. A finished record starts a new window at its
    /// stop time. An unfinished one is resumed with its window and cursor.
    pub fn update_from_scan_record(&mut self, record: &ScanRecord) -> Result<()> {
        let input_dir = self.input_dir.to_string_lossy().into_owned();
        if record.input_dir() != input_dir {
            return Err(Error::precondition(format!(
                "Input directories must match: history has {:?}, scan has {:?}",
                record.input_dir(),
                input_dir
            )));
        }
        let safe_time = self.safe_time;
        let active = self.active_mut()?;

        if record.is_complete() {
            let start = record.time_period().stop().min(safe_time - 1);
            active.time_period = TimePeriod::new(start, safe_time)?;
            active.last_path.clear();
        } else {
            active.time_period = record.time_period();
            active.last_path = record.last_path().to_string();
        }
        Ok(())
    }

    pub fn to_scan_record(&self) -> Result<ScanRecord> {
        let active = self.active()?;
        ScanRecord::new(
            active.time_period.start(),
            active.time_period.stop(),
            self.input_dir.to_string_lossy(),
            active.last_path.clone(),
        )
    }

    /// Moves the cursor to `entry` and saves if the autosave period has passed.
    pub fn just_scanned_this_entry(&mut self, entry: &Entry) -> Result<()> {
        self.active_mut()?.last_path = entry.rel_str();
        self.save_state(false)
    }

    /// Symlinks are never followed. Directories are always entered. Files
    /// count only if their modification time falls inside the window.
    pub fn should_consider_entry(&self, entry: &Entry) -> Result<bool> {
        let window = self.active()?.time_period;
        if entry.is_link() {
            return Ok(false);
        }
        if entry.is_dir() {
            return Ok(true);
        }
        Ok(window.contains(entry.modified_secs()?))
    }

    pub fn list_unscanned_entries(&self, dir: &Entry) -> Result<Vec<Entry>> {
        list_unscanned_entries(dir, &self.active()?.last_path)
    }

    /// Records the scan as finished and closes it.
    pub fn complete_scan(&mut self) -> Result<()> {
        self.active_mut()?.last_path.clear();
        self.save_state(true)?;
        self.state = ScanState::Closed;
        Ok(())
    }

    /// Stops early. The cursor is saved so the next run resumes after it. With
    /// no cursor there is nothing worth saving and the history is left alone.
    pub fn premature_exit(&mut self) -> Result<()> {
        if !self.active()?.last_path.is_empty() {
            self.save_state(true)?;
        }
        self.state = ScanState::Closed;
        Ok(())
    }

    /// Writes the current record to both history files. Unforced saves are
    /// skipped until the autosave period has elapsed since the last write.
    pub fn save_state(&mut self, force: bool) -> Result<()> {
        let current_time = now();
        let autosave_period = self.settings.autosave_period_secs;
        let last_update = self.active()?.last_history_update;

        if !force && current_time - last_update <= autosave_period {
            return Ok(());
        }

        let record = self.to_scan_record()?;
        append_scan_record(&self.log_file, &record)?;
        overwrite_scan_record(&self.active_file, &record)?;
        self.active_mut()?.last_history_update = current_time;
        Ok(())
    }
}
