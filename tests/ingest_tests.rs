use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;

use logjam_ingest::fields::LUMBERJACK_MARKER;
use logjam_ingest::incremental::{
    extract_last_scan_record, now, overwrite_scan_record, Scan, ScanRecord, TimePeriod,
};
use logjam_ingest::sink::{
    read_documents, IndexOutcome, IndexSink, IndexedDocument, SinkError, SinkFactory,
    SinkSettings,
};
use logjam_ingest::{
    ingest_log_files, CancelToken, Entry, Error, IngestOptions, NodeFields, SilentReporter,
};

const CASE: &str = "2004144146";
const OLD_MTIME: i64 = 1_500_000_000;
const TIME_SPAN: &str = "20130713153017-20130713160517";

#[derive(Debug, Clone)]
struct Sent {
    case: String,
    relative: String,
    fields: NodeFields,
}

/// Records every file handed to a sink. Optionally cancels the run after the
/// first file.
#[derive(Clone, Default)]
struct RecordingSinks {
    sent: Arc<Mutex<Vec<Sent>>>,
    cancel_after_first: Option<CancelToken>,
}

struct RecordingSink {
    case: String,
    sent: Arc<Mutex<Vec<Sent>>>,
    cancel_after_first: Option<CancelToken>,
}

impl SinkFactory for RecordingSinks {
    fn open(&self, case_num: &str) -> Result<Box<dyn IndexSink>, SinkError> {
        Ok(Box::new(RecordingSink {
            case: case_num.to_string(),
            sent: Arc::clone(&self.sent),
            cancel_after_first: self.cancel_after_first.clone(),
        }))
    }
}

impl IndexSink for RecordingSink {
    fn send_file(&mut self, fields: &NodeFields, entry: &Entry) -> Result<IndexOutcome, SinkError> {
        let Some(batches) = read_documents(fields, entry, 100)? else {
            return Ok(IndexOutcome::Undecodable);
        };
        let mut documents = 0;
        for batch in batches {
            documents += batch?.len();
        }
        self.sent.lock().unwrap().push(Sent {
            case: self.case.clone(),
            relative: entry.rel_str(),
            fields: fields.clone(),
        });
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        Ok(IndexOutcome::Indexed(documents))
    }
}

impl RecordingSinks {
    fn relative_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.relative.clone())
            .collect();
        paths.sort();
        paths
    }
}

struct Workspace {
    _tmp: tempfile::TempDir,
    input: PathBuf,
    scratch: PathBuf,
    history: PathBuf,
}

fn workspace() -> Workspace {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    Workspace {
        input,
        scratch: tmp.path().join("scratch"),
        history: tmp.path().join("history"),
        _tmp: tmp,
    }
}

fn write_old(path: &Path, contents: impl AsRef<[u8]>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(OLD_MTIME, 0)).unwrap();
}

/// Layout:
///   input/
///     README.txt                       (not a case, ignored)
///     notes/                           (not a case, ignored)
///     2004144146/
///       grid-117/dc1-s1/<span>/        (node directory)
///         lumberjack.log
///         system_commands
///         servermanager.log
///       loose/
///         bycast-tagged.txt            (mentions bycast)
///         unrelated.txt                (skipped)
fn create_case_tree(input: &Path) {
    write_old(&input.join("README.txt"), "bycast readme\n");
    write_old(&input.join("notes/bycast.log"), "bycast\n");

    let node = input.join(CASE).join("grid-117/dc1-s1").join(TIME_SPAN);
    write_old(&node.join(LUMBERJACK_MARKER), "");
    write_old(
        &node.join("system_commands"),
        "Package storage-grid-release-11.5.0-20210312 installed\n",
    );
    write_old(&node.join("servermanager.log"), "started\nstopped\n");

    let loose = input.join(CASE).join("loose");
    write_old(&loose.join("bycast-tagged.txt"), "line one\n");
    write_old(&loose.join("unrelated.txt"), "nothing\n");
}

fn options() -> IngestOptions {
    IngestOptions {
        processors: Some(2),
        ..IngestOptions::default()
    }
}

fn run(ws: &Workspace, sinks: &dyn SinkFactory, options: &IngestOptions) -> logjam_ingest::ingest::IngestReport {
    ingest_log_files(
        &ws.input,
        &ws.scratch,
        &ws.history,
        sinks,
        &SilentReporter,
        options,
    )
    .unwrap()
}

fn node_file(rel: &str) -> String {
    format!("{CASE}/grid-117/dc1-s1/{TIME_SPAN}/{rel}")
}

#[test]
fn test_ingest_sends_relevant_files_with_node_fields() {
    let ws = workspace();
    create_case_tree(&ws.input);
    let sinks = RecordingSinks::default();

    let report = run(&ws, &sinks, &options());
    assert!(!report.cancelled);
    assert_eq!(report.cases_dispatched, 1);

    assert_eq!(
        sinks.relative_paths(),
        vec![
            node_file("lumberjack.log"),
            node_file("servermanager.log"),
            node_file("system_commands"),
            format!("{CASE}/loose/bycast-tagged.txt"),
        ]
    );

    let sent = sinks.sent.lock().unwrap();
    let server_manager = sent
        .iter()
        .find(|s| s.relative.ends_with("servermanager.log"))
        .unwrap();
    assert_eq!(server_manager.case, CASE);
    assert_eq!(server_manager.fields.case_num, CASE);
    assert_eq!(server_manager.fields.node_name, "dc1-s1");
    assert_eq!(server_manager.fields.sg_version, (11, 5));

    let loose = sent
        .iter()
        .find(|s| s.relative.ends_with("bycast-tagged.txt"))
        .unwrap();
    assert_eq!(loose.fields.case_num, CASE);
    assert_eq!(loose.fields.node_name, NodeFields::MISSING_NODE_NAME);

    let stats = report.stats.get(CASE).unwrap();
    assert_eq!(stats.files_indexed, 4);
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(stats.documents, 4);
}

#[test]
fn test_second_run_sends_nothing_new() {
    let ws = workspace();
    create_case_tree(&ws.input);

    let first = RecordingSinks::default();
    run(&ws, &first, &options());
    assert_eq!(first.relative_paths().len(), 4);

    // Only the manager history survives a completed run.
    let record = extract_last_scan_record(&ws.history.join(Scan::ACTIVE_FILE)).unwrap();
    assert!(record.is_complete());
    assert!(!ws.history.join(format!("{CASE}.txt")).exists());
    assert!(!ws.history.join(format!("{CASE}-log.txt")).exists());
    assert!(!ws.scratch.join(format!("worker-{CASE}")).exists());

    let second = RecordingSinks::default();
    let report = run(&ws, &second, &options());
    assert!(second.relative_paths().is_empty());
    assert_eq!(report.cases_dispatched, 1);
}

#[test]
fn test_archives_are_unpacked_into_scratch_and_indexed() {
    let ws = workspace();

    let mut builder = tar::Builder::new(Vec::new());
    let data = b"bycast first\nbycast second\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "bycast.log", &data[..]).unwrap();
    let tar = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    let archive = ws.input.join(CASE).join("logs.tar.gz");
    write_old(&archive, encoder.finish().unwrap());

    let sinks = RecordingSinks::default();
    let report = run(&ws, &sinks, &options());

    assert_eq!(sinks.relative_paths(), vec![format!("{CASE}/logs/bycast.log")]);
    let stats = report.stats.get(CASE).unwrap();
    assert_eq!(stats.archives_extracted, 2);
    assert_eq!(stats.archive_failures, 0);
    assert_eq!(stats.documents, 2);

    assert!(archive.is_file());
    assert!(!ws.input.join(CASE).join("logs").exists());
    assert!(!ws.scratch.join(format!("worker-{CASE}")).exists());
}

#[test]
fn test_corrupt_archive_is_counted_and_skipped() {
    let ws = workspace();
    write_old(&ws.input.join(CASE).join("broken.tgz"), "not gzip");
    write_old(&ws.input.join(CASE).join("bycast.log"), "ok\n");

    let sinks = RecordingSinks::default();
    let report = run(&ws, &sinks, &options());

    assert_eq!(sinks.relative_paths(), vec![format!("{CASE}/bycast.log")]);
    assert_eq!(report.stats.get(CASE).unwrap().archive_failures, 1);
}

#[test]
fn test_sibling_prefixed_directories_are_all_indexed() {
    let ws = workspace();
    let case = ws.input.join(CASE);
    for rel in [
        "a/bycast.log",
        "a.b/bycast.log",
        "node/bycast.log",
        "node-old/bycast.log",
        "logs/x/bycast.log",
        "logs (1)/bycast.log",
    ] {
        write_old(&case.join(rel), "bycast\n");
    }

    let sinks = RecordingSinks::default();
    run(&ws, &sinks, &options());

    assert_eq!(
        sinks.relative_paths(),
        vec![
            format!("{CASE}/a.b/bycast.log"),
            format!("{CASE}/a/bycast.log"),
            format!("{CASE}/logs (1)/bycast.log"),
            format!("{CASE}/logs/x/bycast.log"),
            format!("{CASE}/node-old/bycast.log"),
            format!("{CASE}/node/bycast.log"),
        ]
    );
}

#[test]
fn test_run_resumes_from_an_incomplete_worker_record() {
    let ws = workspace();
    for name in ["a.log", "b.log", "c.log", "d.log"] {
        write_old(&ws.input.join(CASE).join(name), "bycast\n");
    }

    // A previous run got as far as c.log before stopping.
    fs::create_dir_all(&ws.history).unwrap();
    let input_dir = Entry::root(&ws.input).source().to_string_lossy().into_owned();
    let record = ScanRecord::new(
        TimePeriod::ancient_history(),
        now() - 360,
        input_dir,
        format!("{CASE}/c.log"),
    )
    .unwrap();
    overwrite_scan_record(&ws.history.join(format!("{CASE}.txt")), &record).unwrap();
    fs::write(ws.history.join(format!("{CASE}-log.txt")), format!("{record}\n")).unwrap();

    let sinks = RecordingSinks::default();
    run(&ws, &sinks, &options());

    assert_eq!(
        sinks.relative_paths(),
        vec![format!("{CASE}/a.log"), format!("{CASE}/b.log")]
    );
}

#[test]
fn test_cancelled_run_resumes_without_repeating_work() {
    let ws = workspace();
    for name in ["a.log", "b.log", "c.log"] {
        write_old(&ws.input.join(CASE).join(name), "bycast\n");
    }

    let cancel = CancelToken::new();
    let first = RecordingSinks {
        cancel_after_first: Some(cancel.clone()),
        ..RecordingSinks::default()
    };
    let first_options = IngestOptions {
        processors: Some(1),
        cancel,
        ..IngestOptions::default()
    };
    let report = run(&ws, &first, &first_options);
    assert!(report.cancelled);
    assert_eq!(first.relative_paths(), vec![format!("{CASE}/c.log")]);
    assert!(ws.history.join(format!("{CASE}-log.txt")).exists());

    let second = RecordingSinks::default();
    let report = run(&ws, &second, &options());
    assert!(!report.cancelled);
    assert_eq!(
        second.relative_paths(),
        vec![format!("{CASE}/a.log"), format!("{CASE}/b.log")]
    );
}

#[test]
fn test_cancelled_before_start_records_nothing() {
    let ws = workspace();
    create_case_tree(&ws.input);

    let cancelled = IngestOptions {
        cancel: CancelToken::new(),
        ..options()
    };
    cancelled.cancel.cancel();
    let sinks = RecordingSinks::default();
    let report = run(&ws, &sinks, &cancelled);

    assert!(report.cancelled);
    assert!(sinks.relative_paths().is_empty());
    assert_eq!(
        fs::read_to_string(ws.history.join(Scan::ACTIVE_FILE)).unwrap(),
        ""
    );
}

#[test]
fn test_ignore_patterns_skip_matching_entries() {
    let ws = workspace();
    write_old(&ws.input.join(CASE).join("keep.log"), "bycast\n");
    write_old(&ws.input.join(CASE).join("skipme.log"), "bycast\n");

    let options = IngestOptions {
        ignore_patterns: vec!["*skipme*".to_string(), "[".to_string()],
        ..options()
    };
    let sinks = RecordingSinks::default();
    run(&ws, &sinks, &options);
    assert_eq!(sinks.relative_paths(), vec![format!("{CASE}/keep.log")]);
}

#[test]
fn test_json_lines_sink_output() {
    let ws = workspace();
    write_old(&ws.input.join(CASE).join("bycast.log"), "first\r\nsecond\n");
    let output_dir = ws.scratch.parent().unwrap().join("output");
    let sinks = SinkSettings::JsonLines {
        output_dir: output_dir.clone(),
        bulk_size: 1,
    };
    sinks.prepare().unwrap();

    run(&ws, &sinks, &options());

    let contents = fs::read_to_string(output_dir.join(format!("{CASE}.ndjson"))).unwrap();
    let docs: Vec<IndexedDocument> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].id, format!("{CASE}/bycast.log/1"));
    assert_eq!(docs[0].source.message, "first");
    assert_eq!(docs[1].id, format!("{CASE}/bycast.log/2"));
    assert_eq!(docs[1].source.message, "second");
    assert_eq!(docs[1].source.case, CASE);
    assert_eq!(docs[1].source.major_version, -1);
}

#[test]
fn test_missing_input_is_rejected() {
    let ws = workspace();
    let missing = ws.input.join("nope");
    let err = ingest_log_files(
        &missing,
        &ws.scratch,
        &ws.history,
        &RecordingSinks::default(),
        &SilentReporter,
        &options(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}
