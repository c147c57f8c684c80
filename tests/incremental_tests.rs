use std::fs;
use std::path::Path;

use tempfile::tempdir;

use logjam_ingest::incremental::{
    extract_last_scan_record, list_unscanned_entries, order_key, overwrite_scan_record,
    ManagerScan, Scan, ScanRecord, ScanSettings, TimePeriod, WorkerScan,
};
use logjam_ingest::{Entry, Error};

struct Dirs {
    _tmp: tempfile::TempDir,
    input: std::path::PathBuf,
    history: std::path::PathBuf,
    scratch: std::path::PathBuf,
}

fn dirs() -> Dirs {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    Dirs {
        input,
        history: tmp.path().join("history"),
        scratch: tmp.path().join("scratch"),
        _tmp: tmp,
    }
}

fn last_recorded_path(file: &Path) -> String {
    extract_last_scan_record(file).unwrap().last_path().to_string()
}

#[test]
fn test_new_scan_starts_from_ancient_history() {
    let d = dirs();
    let scan = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();

    assert!(d.history.join(Scan::ACTIVE_FILE).is_file());
    assert!(d.history.join(Scan::LOG_FILE).is_file());
    assert!(d.scratch.is_dir());
    assert_eq!(scan.last_path().unwrap(), "");

    let period = scan.time_period().unwrap();
    assert_eq!(period.start(), TimePeriod::ancient_history());
    assert_eq!(period.stop(), scan.safe_time());
}

#[test]
fn test_premature_exit_is_resumed_by_next_scan() {
    let d = dirs();
    let mut scan = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    let period = scan.time_period().unwrap();
    scan.just_scanned_this_entry(&Entry::new(&d.input, "2001392039/node/a.log"))
        .unwrap();
    scan.premature_exit().unwrap();
    assert!(scan.is_closed());

    let resumed = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    assert_eq!(resumed.last_path().unwrap(), "2001392039/node/a.log");
    assert_eq!(resumed.time_period().unwrap(), period);
}

#[test]
fn test_premature_exit_without_progress_leaves_history_alone() {
    let d = dirs();
    let mut scan = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    scan.premature_exit().unwrap();
    assert_eq!(fs::read_to_string(d.history.join(Scan::ACTIVE_FILE)).unwrap(), "");
}

#[test]
fn test_completed_scan_starts_next_window_at_its_stop() {
    let d = dirs();
    let mut scan = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    scan.just_scanned_this_entry(&Entry::new(&d.input, "2001392039"))
        .unwrap();
    let first_stop = scan.time_period().unwrap().stop();
    scan.complete_scan().unwrap();

    let record = extract_last_scan_record(&d.history.join(Scan::ACTIVE_FILE)).unwrap();
    assert!(record.is_complete());

    let next = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    let period = next.time_period().unwrap();
    assert!(period.start() <= first_stop);
    assert!(period.start() >= first_stop - 1);
    assert!(period.stop() >= first_stop);
    assert_eq!(next.last_path().unwrap(), "");
}

#[test]
fn test_closed_scan_rejects_every_operation() {
    let d = dirs();
    let mut scan = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    scan.complete_scan().unwrap();

    let entry = Entry::new(&d.input, "x");
    assert!(matches!(scan.last_path(), Err(Error::ScanClosed)));
    assert!(matches!(scan.time_period(), Err(Error::ScanClosed)));
    assert!(matches!(scan.just_scanned_this_entry(&entry), Err(Error::ScanClosed)));
    assert!(matches!(scan.should_consider_entry(&entry), Err(Error::ScanClosed)));
    assert!(matches!(scan.save_state(true), Err(Error::ScanClosed)));
    assert!(matches!(scan.complete_scan(), Err(Error::ScanClosed)));
    assert!(matches!(scan.premature_exit(), Err(Error::ScanClosed)));
}

#[test]
fn test_autosave_waits_for_the_period() {
    let d = dirs();
    let settings = ScanSettings {
        autosave_period_secs: 10_000,
        ..ScanSettings::default()
    };
    let mut scan = Scan::new(&d.input, &d.history, &d.scratch, settings).unwrap();
    let active = d.history.join(Scan::ACTIVE_FILE);

    // Nothing has been written yet, so the first entry saves immediately.
    scan.just_scanned_this_entry(&Entry::new(&d.input, "b")).unwrap();
    assert_eq!(last_recorded_path(&active), "b");

    scan.just_scanned_this_entry(&Entry::new(&d.input, "a")).unwrap();
    assert_eq!(last_recorded_path(&active), "b");

    scan.save_state(true).unwrap();
    assert_eq!(last_recorded_path(&active), "a");

    let log = fs::read_to_string(d.history.join(Scan::LOG_FILE)).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[test]
fn test_history_for_another_input_is_rejected() {
    let d = dirs();
    fs::create_dir_all(&d.history).unwrap();
    let record = ScanRecord::new(0, 100, "/somewhere/else", "x").unwrap();
    overwrite_scan_record(&d.history.join(Scan::ACTIVE_FILE), &record).unwrap();

    let err = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[test]
fn test_malformed_history_is_rejected() {
    let d = dirs();
    fs::create_dir_all(&d.history).unwrap();
    fs::write(d.history.join(Scan::ACTIVE_FILE), "12 not-a-number \"/in\" \"\"\n").unwrap();

    let err = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap_err();
    assert!(matches!(err, Error::HistoryRecord { .. }));
}

#[test]
fn test_should_consider_entry_uses_window() {
    let d = dirs();
    let scan = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();

    fs::create_dir_all(d.input.join("dir")).unwrap();
    fs::write(d.input.join("old.log"), "x").unwrap();
    fs::write(d.input.join("fresh.log"), "x").unwrap();
    filetime::set_file_mtime(
        d.input.join("old.log"),
        filetime::FileTime::from_unix_time(1_000_000_000, 0),
    )
    .unwrap();

    assert!(scan.should_consider_entry(&Entry::new(&d.input, "dir")).unwrap());
    assert!(scan.should_consider_entry(&Entry::new(&d.input, "old.log")).unwrap());
    // Written just now, so it is newer than the safe time.
    assert!(!scan.should_consider_entry(&Entry::new(&d.input, "fresh.log")).unwrap());
}

#[test]
fn test_list_unscanned_entries_resumes_after_cursor() {
    let tmp = tempdir().unwrap();
    for name in ["a", "a.old", "a-b", "b", "c"] {
        fs::create_dir_all(tmp.path().join(name)).unwrap();
    }
    let root = Entry::root(tmp.path());

    let cases: [(&str, &[&str]); 7] = [
        ("", &["c", "b", "a", "a.old", "a-b"]),
        ("c", &["b", "a", "a.old", "a-b"]),
        ("b", &["a", "a.old", "a-b"]),
        ("b/zzz", &["b", "a", "a.old", "a-b"]),
        ("a/x", &["a", "a.old", "a-b"]),
        ("a.old", &["a-b"]),
        ("0", &[]),
    ];
    for (cursor, expected) in cases {
        let names: Vec<String> = list_unscanned_entries(&root, cursor)
            .unwrap()
            .iter()
            .map(Entry::rel_str)
            .collect();
        assert_eq!(names, expected, "cursor {cursor:?}");
    }
}

fn create_nested_tree(root: &Path) {
    for rel in [
        "fileX.txt",
        "dir3/nested/fileA.txt",
        "dir3/nested/fileB.txt",
        "dir3/nested/fileC.txt",
        "dir2/fileA.txt",
        "dir2/fileB.txt",
        "dir/nested/fileA.txt",
        "dir.old/fileD.txt",
        "dir-b/fileE.txt",
        "dir-b/sub.d/fileF.txt",
        "dir-b/sub/fileG.txt",
    ] {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x\n").unwrap();
    }
}

fn all_relative_paths(root: &Path, dir: &Path, out: &mut Vec<String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
        out.push(rel);
        if path.is_dir() {
            all_relative_paths(root, &path, out);
        }
    }
}

/// Walks the tree the way the ingester does: a directory's contents first,
/// then the directory itself. Returns false once `budget` entries are done.
fn walk(scan: &mut Scan, dir: &Entry, budget: &mut usize, finished: &mut Vec<String>) -> bool {
    for entry in scan.list_unscanned_entries(dir).unwrap() {
        if entry.is_dir() && !walk(scan, &entry, budget, finished) {
            return false;
        }
        if *budget == 0 {
            return false;
        }
        scan.just_scanned_this_entry(&entry).unwrap();
        finished.push(entry.rel_str());
        *budget -= 1;
    }
    true
}

fn save_every_entry() -> ScanSettings {
    ScanSettings {
        autosave_period_secs: -1,
        ..ScanSettings::default()
    }
}

#[test]
fn test_cursor_only_moves_down_the_recursive_order() {
    let d = dirs();
    create_nested_tree(&d.input);
    let mut scan = Scan::new(&d.input, &d.history, &d.scratch, save_every_entry()).unwrap();

    let mut finished = Vec::new();
    let mut unlimited = usize::MAX;
    assert!(walk(&mut scan, &Entry::root(&d.input), &mut unlimited, &mut finished));

    let mut expected = Vec::new();
    all_relative_paths(&d.input, &d.input, &mut expected);
    let mut visited = finished.clone();
    visited.sort();
    expected.sort();
    assert_eq!(visited, expected);

    let log = fs::read_to_string(d.history.join(Scan::LOG_FILE)).unwrap();
    let cursors: Vec<String> = log
        .lines()
        .map(|line| line.parse::<ScanRecord>().unwrap().last_path().to_string())
        .collect();
    assert_eq!(cursors, finished);
    for pair in cursors.windows(2) {
        assert!(
            order_key(&pair[0]) > order_key(&pair[1]),
            "{:?} is not before {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_interrupted_walk_resumes_without_gaps_or_repeats() {
    let layout = dirs();
    create_nested_tree(&layout.input);
    let mut expected = Vec::new();
    all_relative_paths(&layout.input, &layout.input, &mut expected);
    expected.sort();

    for stop_after in 1..expected.len() {
        let d = dirs();
        create_nested_tree(&d.input);
        let root = Entry::root(&d.input);
        let mut finished = Vec::new();

        let mut first = Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
        let mut budget = stop_after;
        assert!(!walk(&mut first, &root, &mut budget, &mut finished));
        first.premature_exit().unwrap();

        let mut resumed =
            Scan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
        let mut unlimited = usize::MAX;
        assert!(walk(&mut resumed, &root, &mut unlimited, &mut finished));

        finished.sort();
        assert_eq!(finished, expected, "stopped after {stop_after}");
    }
}

#[test]
fn test_worker_history_lifecycle() {
    let d = dirs();
    let mut manager =
        ManagerScan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    let case = "2004144146";

    let mut worker = WorkerScan::new(&manager, case).unwrap();
    assert!(!worker.already_scanned());
    assert_eq!(
        worker.scan().unwrap().time_period().unwrap(),
        manager.time_period().unwrap()
    );
    assert!(d.history.join("2004144146.txt").is_file());
    assert!(d.history.join("2004144146-log.txt").is_file());
    assert!(worker.scratch_dir().is_dir());
    assert_eq!(worker.scratch_dir(), d.scratch.join("worker-2004144146"));

    worker.complete_scan().unwrap();
    assert!(!d.history.join("2004144146-log.txt").exists());
    assert!(!worker.scratch_dir().exists());
    assert!(manager.case_finished(case));

    let again = WorkerScan::new(&manager, case).unwrap();
    assert!(again.already_scanned());
    assert!(matches!(again.scan(), Err(Error::ScanClosed)));

    manager.complete_scan().unwrap();
    assert!(!d.history.join("2004144146.txt").exists());
    assert!(d.history.join(Scan::ACTIVE_FILE).is_file());
}

#[test]
fn test_manager_folds_only_the_finished_prefix() {
    let d = dirs();
    let mut manager =
        ManagerScan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    let cases: Vec<String> = ["2000000003", "2000000002", "2000000001"]
        .iter()
        .map(|c| c.to_string())
        .collect();

    let mut first = WorkerScan::new(&manager, &cases[0]).unwrap();
    first.complete_scan().unwrap();

    let mut second = WorkerScan::new(&manager, &cases[1]).unwrap();
    second
        .scan_mut()
        .unwrap()
        .just_scanned_this_entry(&Entry::new(&d.input, "2000000002/node"))
        .unwrap();
    second.premature_exit().unwrap();

    let mut third = WorkerScan::new(&manager, &cases[2]).unwrap();
    third.complete_scan().unwrap();

    manager.premature_exit(&cases).unwrap();

    assert!(!d.history.join("2000000003.txt").exists());
    assert!(d.history.join("2000000002.txt").is_file());
    assert!(d.history.join("2000000002-log.txt").is_file());
    assert!(d.history.join("2000000001.txt").is_file());
    assert_eq!(
        last_recorded_path(&d.history.join(Scan::ACTIVE_FILE)),
        "2000000003"
    );

    // The unfinished worker resumes from its own cursor.
    let manager =
        ManagerScan::new(&d.input, &d.history, &d.scratch, ScanSettings::default()).unwrap();
    assert_eq!(manager.last_path().unwrap(), "2000000003");
    let resumed = WorkerScan::new(&manager, &cases[1]).unwrap();
    assert_eq!(resumed.scan().unwrap().last_path().unwrap(), "2000000002/node");
}
