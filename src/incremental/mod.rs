//! Incremental, resumable scanning.
//!
//! A scan covers a half-open modification-time window and walks the input
//! tree in a fixed recursive order. Its progress is a single cursor
//! (`last_path`) persisted to plain-text history files, so an interrupted run
//! picks up right after the last entry it finished.

mod manager;
mod order;
mod scan;
mod worker;

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

pub use manager::ManagerScan;
pub use order::{list_unscanned_entries, order_key, sorted_recursive_order};
pub use scan::Scan;
pub use worker::WorkerScan;

/// Current wall-clock time in whole seconds since the epoch.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Timing knobs shared by every scan of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Minimum seconds between unforced history writes.
    pub autosave_period_secs: i64,
    /// How far behind the current time the window must stop.
    pub safe_time_offset_secs: i64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            autosave_period_secs: 120,
            safe_time_offset_secs: 6 * 60,
        }
    }
}

/// Half-open interval `[start, stop)` of epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimePeriod {
    start: i64,
    stop: i64,
}

impl TimePeriod {
    pub fn new(start: i64, stop: i64) -> Result<Self> {
        if start >= stop {
            return Err(Error::precondition(format!(
                "Start time must be before stop time ({start} >= {stop})"
            )));
        }
        Ok(Self { start, stop })
    }

    /// 1900-01-01, the start of the very first window.
    pub const fn ancient_history() -> i64 {
        const SECONDS_IN_YEAR: i64 = 365 * 24 * 60 * 60;
        -70 * SECONDS_IN_YEAR
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn stop(&self) -> i64 {
        self.stop
    }

    pub fn contains(&self, time: i64) -> bool {
        self.start <= time && time < self.stop
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.start, self.stop)
    }
}

/// One line of a history file: `<start> <stop> "<input_dir>" "<last_path>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    time_period: TimePeriod,
    input_dir: String,
    last_path: String,
}

impl ScanRecord {
    pub fn new(
        start: i64,
        stop: i64,
        input_dir: impl Into<String>,
        last_path: impl Into<String>,
    ) -> Result<Self> {
        let input_dir = input_dir.into();
        if input_dir.is_empty() {
            return Err(Error::precondition("Input directory cannot be empty"));
        }
        Ok(Self {
            time_period: TimePeriod::new(start, stop)?,
            input_dir,
            last_path: last_path.into(),
        })
    }

    /// A record with no cursor describes a finished scan.
    pub fn is_complete(&self) -> bool {
        self.last_path.is_empty()
    }

    pub fn time_period(&self) -> TimePeriod {
        self.time_period
    }

    pub fn input_dir(&self) -> &str {
        &self.input_dir
    }

    pub fn last_path(&self) -> &str {
        &self.last_path
    }
}

impl fmt::Display for ScanRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" \"{}\"",
            self.time_period, self.input_dir, self.last_path
        )
    }
}

impl FromStr for ScanRecord {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let malformed = |reason: &str| Error::HistoryRecord {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        if line.is_empty() {
            return Err(malformed("empty record"));
        }

        let space_tokens: Vec<&str> = line.split(' ').collect();
        if space_tokens.len() < 4 {
            return Err(malformed("expected at least 4 space separated tokens"));
        }
        let start: i64 = space_tokens[0]
            .parse()
            .map_err(|_| malformed("start time is not an integer"))?;
        let stop: i64 = space_tokens[1]
            .parse()
            .map_err(|_| malformed("stop time is not an integer"))?;

        let quote_tokens: Vec<&str> = line.split('"').collect();
        if quote_tokens.len() != 5 {
            return Err(malformed("expected exactly 2 quoted fields"));
        }
        let input_dir = quote_tokens[1];
        if input_dir.is_empty() {
            return Err(malformed("input directory is empty"));
        }
        let last_path = quote_tokens[3];

        ScanRecord::new(start, stop, input_dir, last_path)
            .map_err(|e| malformed(&e.to_string()))
    }
}

/// Parses the last record of a history file.
pub fn extract_last_scan_record(path: &Path) -> Result<ScanRecord> {
    let contents = fs::read_to_string(path)?;
    let last_line = contents
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| Error::HistoryRecord {
            line: String::new(),
            reason: format!("no record in {}", path.display()),
        })?;
    last_line.parse()
}

/// Replaces the contents of a history file with a single record.
pub fn overwrite_scan_record(path: &Path, record: &ScanRecord) -> Result<()> {
    fs::write(path, format!("{record}\n"))?;
    Ok(())
}

/// Appends one record to a history file.
pub fn append_scan_record(path: &Path, record: &ScanRecord) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    Ok(())
}
