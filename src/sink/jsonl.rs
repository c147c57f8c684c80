use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{read_documents, IndexOutcome, IndexSink, IndexedDocument, SinkError};
use crate::fields::NodeFields;
use crate::paths::Entry;

/// Writes documents as newline-delimited JSON into `<output_dir>/<case>.ndjson`.
/// Each line is `{"_id": ..., "_source": {...}}`, the same pair a bulk request
/// carries.
///
/// The file is append-only, so a file sent again after a resume repeats its
/// ids. The later line for an id replaces the earlier one, as a bulk index
/// would; [`read_json_lines`] reads a file back that way.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    bulk_size: usize,
}

impl JsonLinesSink {
    pub fn create(output_dir: &Path, case_num: &str, bulk_size: usize) -> Result<Self, SinkError> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("{case_num}.ndjson"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bulk_size: bulk_size.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a JSON-lines output file, keeping the last document written for each
/// id. Documents come back in the order their id first appeared.
pub fn read_json_lines(path: &Path) -> Result<Vec<IndexedDocument>, SinkError> {
    let reader = BufReader::new(File::open(path)?);
    let mut documents: Vec<IndexedDocument> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: IndexedDocument = serde_json::from_str(&line)?;
        match positions.get(&doc.id) {
            Some(&index) => documents[index] = doc,
            None => {
                positions.insert(doc.id.clone(), documents.len());
                documents.push(doc);
            }
        }
    }
    Ok(documents)
}

impl IndexSink for JsonLinesSink {
    fn send_file(&mut self, fields: &NodeFields, entry: &Entry) -> Result<IndexOutcome, SinkError> {
        let Some(batches) = read_documents(fields, entry, self.bulk_size)? else {
            return Ok(IndexOutcome::Undecodable);
        };

        let mut written = 0;
        for batch in batches {
            let batch = batch?;
            for doc in &batch {
                serde_json::to_writer(&mut self.writer, doc)?;
                self.writer.write_all(b"\n")?;
            }
            self.writer.flush()?;
            written += batch.len();
        }
        debug!("Wrote {} documents from {} to {}", written, entry, self.path.display());
        Ok(IndexOutcome::Indexed(written))
    }
}
