use glob::Pattern;
use tracing::{debug, error, warn};

use crate::archive::{is_supported_archive, strip_all_zip_exts, Extractor};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::fields::{extract_fields, is_lumberjack_dir, FieldRules, NodeFields};
use crate::incremental::Scan;
use crate::paths::Entry;
use crate::sink::{IndexOutcome, IndexSink};
use crate::stats::CaseStats;

/// Everything one worker needs to walk a case directory.
pub struct CaseSearch<'a> {
    pub rules: &'a FieldRules,
    pub extractor: &'a Extractor,
    pub ignore_patterns: &'a [Pattern],
    pub cancel: &'a CancelToken,
    pub sink: &'a mut dyn IndexSink,
    pub stats: CaseStats,
}

impl<'a> CaseSearch<'a> {
    /// Walks `cur_dir` in recursive order, resuming after the scan's cursor.
    ///
    /// Archives are unpacked into scratch space and walked there. Relevant
    /// files go to the sink. Every finished entry advances the cursor,
    /// whatever happened to it, so a resumed run never repeats work. On
    /// cancellation the walk returns early and leaves the cursor on the last
    /// finished entry.
    pub fn recursive_search(&mut self, scan: &mut Scan, fields: &NodeFields, cur_dir: &Entry) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let fields = if is_lumberjack_dir(&cur_dir.abspath()) {
            debug!("Extracting fields from lumberjack directory: {}", cur_dir.rel_str());
            extract_fields(self.rules, &cur_dir.abspath(), fields)
        } else {
            fields.clone()
        };

        let entries = match scan.list_unscanned_entries(cur_dir) {
            Ok(entries) => entries,
            Err(Error::Io(e)) => {
                error!("Could not access directory: {}\nError: {}\nSkipping directory", cur_dir, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for entry in entries {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            if self.is_ignored(&entry) {
                debug!("Skipping ignored entry: {}", entry);
                scan.just_scanned_this_entry(&entry)?;
                continue;
            }

            let consider = match scan.should_consider_entry(&entry) {
                Ok(consider) => consider,
                Err(Error::Io(e)) => {
                    warn!("Could not read {}: {}", entry, e);
                    false
                }
                Err(e) => return Err(e),
            };
            if !consider {
                debug!("Skipping file, outside timespan: {}", entry);
                scan.just_scanned_this_entry(&entry)?;
                continue;
            }

            let mut target = entry.clone();
            if is_supported_archive(entry.relative()) && entry.is_file() {
                let scratch_entry = unzip_into_scratch_dir(
                    self.extractor,
                    scan.input_dir(),
                    scan.scratch_dir(),
                    &entry,
                    &mut self.stats,
                )?;
                if scratch_entry == entry {
                    debug!("Skipping archive, already unpacked: {}", entry);
                    scan.just_scanned_this_entry(&entry)?;
                    continue;
                }
                debug!("Unpacked archive, path open: {}", scratch_entry);
                target = scratch_entry;
            }

            if target.is_file() {
                self.index_file(&fields, &target);
            } else if target.is_dir() {
                debug!("Recursing into directory: {}", target);
                self.recursive_search(scan, &fields, &target)?;
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
            } else {
                debug!("Skipped unknown entry: {}", target);
            }

            if target.source() == scan.scratch_dir() {
                debug!("Delete unpacked archive: {}", target);
                target.delete()?;
            }

            scan.just_scanned_this_entry(&entry)?;
        }
        Ok(())
    }

    fn is_ignored(&self, entry: &Entry) -> bool {
        let path = entry.abspath();
        self.ignore_patterns.iter().any(|pattern| pattern.matches_path(&path))
    }

    fn index_file(&mut self, fields: &NodeFields, file: &Entry) {
        if !self.rules.is_storagegrid(fields, file) {
            debug!("Skipped Non-StorageGRID file: {}", file);
            self.stats.files_skipped += 1;
            return;
        }

        match self.sink.send_file(fields, file) {
            Ok(IndexOutcome::Indexed(documents)) => {
                self.stats.files_indexed += 1;
                self.stats.documents += documents as u64;
            }
            Ok(IndexOutcome::Undecodable) => {
                self.stats.files_skipped += 1;
            }
            Err(e) => {
                error!("Unable to index {}: {}", file, e);
                self.stats.sink_failures += 1;
            }
        }
    }
}

/// Unpacks an archive into the mirrored location under `scratch_dir`.
///
/// The result is the scratch entry for the archive's path with every
/// archive extension stripped (`case/var/dir.tar.gz` becomes `case/var/dir`).
/// If that path already exists under either root, the archive itself is
/// returned unchanged to signal there is nothing new to walk. Extraction
/// failures are logged and counted, never raised, so the returned entry
/// may not exist.
pub fn unzip_into_scratch_dir(
    extractor: &Extractor,
    input_dir: &std::path::Path,
    scratch_dir: &std::path::Path,
    compressed: &Entry,
    stats: &mut CaseStats,
) -> Result<Entry> {
    if !compressed.is_file() {
        return Err(Error::precondition(format!(
            "Compressed entry should be a file: {compressed}"
        )));
    }
    let input_root = Entry::root(input_dir);
    let scratch_root = Entry::root(scratch_dir);
    if compressed.source() != input_root.source() && compressed.source() != scratch_root.source() {
        return Err(Error::precondition(format!(
            "Source should be input or scratch: {}",
            compressed.source().display()
        )));
    }

    let stripped = strip_all_zip_exts(&compressed.rel_str());
    let scratch_entry = Entry::new(scratch_dir, stripped);
    if scratch_entry.exists_in(input_dir) || scratch_entry.exists_in(scratch_dir) {
        return Ok(compressed.clone());
    }

    match extractor.recursive_unzip(&compressed.abspath(), &scratch_entry.absdirpath()) {
        Ok(mut files) => {
            for file in files.by_ref() {
                if let Err(e) = file {
                    warn!("Skipping nested archive in {}: {}", compressed, e);
                    stats.archive_failures += 1;
                }
            }
            stats.archives_extracted += 1 + files.nested_archives() as u64;
        }
        Err(e) => {
            warn!("Skipping archive {}: {}", compressed, e);
            stats.archive_failures += 1;
        }
    }
    Ok(scratch_entry)
}
