use std::fs::{self, OpenOptions};
use std::ops::AddAssign;
use std::path::Path;

use dashmap::DashMap;

use crate::error::Result;

/// Counters for one case directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseStats {
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub archives_extracted: u64,
    pub archive_failures: u64,
    pub documents: u64,
    pub sink_failures: u64,
}

impl AddAssign for CaseStats {
    fn add_assign(&mut self, other: Self) {
        self.files_indexed += other.files_indexed;
        self.files_skipped += other.files_skipped;
        self.archives_extracted += other.archives_extracted;
        self.archive_failures += other.archive_failures;
        self.documents += other.documents;
        self.sink_failures += other.sink_failures;
    }
}

impl CaseStats {
    const HEADERS: [&'static str; 8] = [
        "run_time",
        "case",
        "files_indexed",
        "files_skipped",
        "archives_extracted",
        "archive_failures",
        "documents",
        "sink_failures",
    ];

    fn to_record(self, run_time: &str, case_num: &str) -> [String; 8] {
        [
            run_time.to_string(),
            case_num.to_string(),
            self.files_indexed.to_string(),
            self.files_skipped.to_string(),
            self.archives_extracted.to_string(),
            self.archive_failures.to_string(),
            self.documents.to_string(),
            self.sink_failures.to_string(),
        ]
    }
}

/// Per-case counters shared by all workers of a run.
#[derive(Debug, Default)]
pub struct IngestStats {
    cases: DashMap<String, CaseStats>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `stats` to the running totals of `case_num`.
    pub fn record(&self, case_num: &str, stats: CaseStats) {
        *self.cases.entry(case_num.to_string()).or_default() += stats;
    }

    pub fn get(&self, case_num: &str) -> Option<CaseStats> {
        self.cases.get(case_num).map(|s| *s)
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    pub fn totals(&self) -> CaseStats {
        let mut totals = CaseStats::default();
        for entry in self.cases.iter() {
            totals += *entry.value();
        }
        totals
    }

    /// Case numbers with their counters, sorted by case number.
    pub fn sorted(&self) -> Vec<(String, CaseStats)> {
        let mut rows: Vec<_> = self
            .cases
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Appends one row per case to `path`, writing the header first if the
    /// file is new.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file_exists = fs::metadata(path).is_ok();
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let mut wtr = csv::Writer::from_writer(file);

        if !file_exists {
            wtr.write_record(CaseStats::HEADERS).map_err(std::io::Error::from)?;
        }

        let run_time = chrono::Local::now().to_rfc3339();
        for (case_num, stats) in self.sorted() {
            wtr.write_record(stats.to_record(&run_time, &case_num))
                .map_err(std::io::Error::from)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
