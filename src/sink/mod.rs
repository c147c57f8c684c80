//! Destinations for indexed log lines.
//!
//! Every line of a relevant file becomes one [`Document`] tagged with the
//! node's fields. Documents are addressed by `<relative path>/<line number>`,
//! so re-sending a file overwrites rather than duplicates.

mod elasticsearch;
mod jsonl;

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::fields::NodeFields;
use crate::paths::Entry;

pub use elasticsearch::ElasticsearchSink;
pub use jsonl::{read_json_lines, JsonLinesSink};

/// Longest id sent as-is. Longer ids are replaced by their BLAKE3 digest.
pub const MAX_ID_BYTES: usize = 512;

pub const DEFAULT_INDEX_NAME: &str = "logjam";

pub const DEFAULT_BULK_SIZE: usize = 500;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Unable to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index rejected documents from {path}: {reason}")]
    Rejected { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The indexed shape of one log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub case: String,
    pub node_name: String,
    pub major_version: i32,
    pub minor_version: i32,
    pub platform: String,
    /// Epoch milliseconds when the file was read, shared by all its lines.
    pub categorize_time: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source")]
    pub source: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The file was sent, producing this many documents.
    Indexed(usize),
    /// The file is not valid UTF-8 and was skipped.
    Undecodable,
}

pub trait IndexSink: Send {
    fn send_file(&mut self, fields: &NodeFields, entry: &Entry) -> Result<IndexOutcome, SinkError>;
}

/// Opens one sink per worker.
pub trait SinkFactory: Send + Sync {
    fn open(&self, case_num: &str) -> Result<Box<dyn IndexSink>, SinkError>;
}

pub fn doc_id(relative_path: &str, line_number: usize) -> String {
    let id = format!("{relative_path}/{line_number}");
    if id.len() > MAX_ID_BYTES {
        blake3::hash(id.as_bytes()).to_hex().to_string()
    } else {
        id
    }
}

/// Streams the lines of `entry` as documents, `batch_size` at a time.
///
/// The file is checked in a first streaming pass and `None` is returned when
/// it is not entirely UTF-8, so nothing is produced for such a file.
pub fn read_documents(
    fields: &NodeFields,
    entry: &Entry,
    batch_size: usize,
) -> io::Result<Option<DocumentBatches>> {
    let path = entry.abspath();
    if !is_utf8_file(&path)? {
        warn!("Error reading {}. Non utf-8 encoding?", entry);
        return Ok(None);
    }

    Ok(Some(DocumentBatches {
        reader: BufReader::new(File::open(&path)?),
        relative_path: entry.rel_str(),
        case: fields.case_num.clone(),
        node_name: fields.node_name.clone(),
        sg_version: fields.sg_version,
        platform: fields.platform.clone(),
        categorize_time: chrono::Utc::now().timestamp_millis(),
        batch_size: batch_size.max(1),
        line_number: 0,
        buf: Vec::new(),
        done: false,
    }))
}

/// Newlines never occur inside a multi-byte sequence, so checking line by
/// line is the same as checking the whole file.
fn is_utf8_file(path: &Path) -> io::Result<bool> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(true);
        }
        if std::str::from_utf8(&buf).is_err() {
            return Ok(false);
        }
    }
}

/// Iterator over the documents of one file in batches of at most
/// `batch_size`. Lines are split like [`str::lines`].
pub struct DocumentBatches {
    reader: BufReader<File>,
    relative_path: String,
    case: String,
    node_name: String,
    sg_version: (i32, i32),
    platform: String,
    categorize_time: i64,
    batch_size: usize,
    line_number: usize,
    buf: Vec<u8>,
    done: bool,
}

impl DocumentBatches {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        String::from_utf8(std::mem::take(&mut self.buf))
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn document(&self, message: String) -> IndexedDocument {
        IndexedDocument {
            id: doc_id(&self.relative_path, self.line_number),
            source: Document {
                case: self.case.clone(),
                node_name: self.node_name.clone(),
                major_version: self.sg_version.0,
                minor_version: self.sg_version.1,
                platform: self.platform.clone(),
                categorize_time: self.categorize_time,
                message,
            },
        }
    }
}

impl Iterator for DocumentBatches {
    type Item = io::Result<Vec<IndexedDocument>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.next_line() {
                Ok(Some(line)) => {
                    self.line_number += 1;
                    batch.push(self.document(line));
                }
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

fn default_index() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

fn default_bulk_size() -> usize {
    DEFAULT_BULK_SIZE
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

/// Where documents go, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkSettings {
    Elasticsearch {
        host: String,
        #[serde(default = "default_index")]
        index: String,
        #[serde(default)]
        mappings_path: Option<PathBuf>,
        #[serde(default = "default_bulk_size")]
        bulk_size: usize,
    },
    JsonLines {
        #[serde(default = "default_output_dir")]
        output_dir: PathBuf,
        #[serde(default = "default_bulk_size")]
        bulk_size: usize,
    },
}

impl Default for SinkSettings {
    fn default() -> Self {
        SinkSettings::JsonLines {
            output_dir: default_output_dir(),
            bulk_size: DEFAULT_BULK_SIZE,
        }
    }
}

impl SinkSettings {
    /// One-time start-up check: the Elasticsearch host answers and the index
    /// exists, or the output directory can be created.
    pub fn prepare(&self) -> Result<(), SinkError> {
        match self {
            SinkSettings::Elasticsearch {
                host,
                index,
                mappings_path,
                bulk_size,
            } => {
                let sink = ElasticsearchSink::new(host, index, *bulk_size)?;
                sink.ping()?;
                sink.ensure_index(mappings_path.as_deref())
            }
            SinkSettings::JsonLines { output_dir, .. } => {
                fs::create_dir_all(output_dir)?;
                Ok(())
            }
        }
    }
}

impl SinkFactory for SinkSettings {
    fn open(&self, case_num: &str) -> Result<Box<dyn IndexSink>, SinkError> {
        match self {
            SinkSettings::Elasticsearch {
                host,
                index,
                bulk_size,
                ..
            } => Ok(Box::new(ElasticsearchSink::new(host, index, *bulk_size)?)),
            SinkSettings::JsonLines {
                output_dir,
                bulk_size,
            } => Ok(Box::new(JsonLinesSink::create(output_dir, case_num, *bulk_size)?)),
        }
    }
}
