use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{read_documents, IndexOutcome, IndexSink, IndexedDocument, SinkError};
use crate::fields::NodeFields;
use crate::paths::Entry;

/// Sends documents to an Elasticsearch `_bulk` endpoint over blocking HTTP.
pub struct ElasticsearchSink {
    client: Client,
    host: String,
    index: String,
    bulk_size: usize,
}

impl ElasticsearchSink {
    pub fn new(host: &str, index: &str, bulk_size: usize) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            index: index.to_string(),
            bulk_size: bulk_size.max(1),
        })
    }

    fn connection_error(&self, reason: impl ToString) -> SinkError {
        SinkError::Connection {
            host: self.host.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn ping(&self) -> Result<(), SinkError> {
        let response = self
            .client
            .get(&self.host)
            .send()
            .map_err(|e| self.connection_error(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.connection_error(response.status()))
        }
    }

    /// Creates the index if it does not exist, with the mappings file as the
    /// request body when one is given.
    pub fn ensure_index(&self, mappings_path: Option<&Path>) -> Result<(), SinkError> {
        let url = format!("{}/{}", self.host, self.index);
        let status = self.client.head(&url).send()?.status();
        if status.is_success() {
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return Err(self.connection_error(status));
        }

        let body = match mappings_path {
            Some(path) => fs::read_to_string(path)?,
            None => "{}".to_string(),
        };
        info!("Index {} did not exist. Creating.", self.index);
        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            Err(self.connection_error(format!("{status}: {text}")))
        }
    }

    fn bulk(&self, documents: &[IndexedDocument], path: &Path) -> Result<(), SinkError> {
        let mut body = String::new();
        for doc in documents {
            let action = json!({ "index": { "_index": self.index, "_id": doc.id } });
            let _ = writeln!(body, "{}", action);
            let _ = writeln!(body, "{}", serde_json::to_string(&doc.source)?);
        }

        let response = self
            .client
            .post(format!("{}/_bulk", self.host))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .map_err(|e| self.connection_error(e))?;

        let status = response.status();
        let reply: Value = response.json()?;
        if !status.is_success() || reply["errors"].as_bool().unwrap_or(false) {
            return Err(SinkError::Rejected {
                path: path.to_path_buf(),
                reason: format!("{status}: {}", first_bulk_error(&reply)),
            });
        }
        Ok(())
    }
}

fn first_bulk_error(reply: &Value) -> String {
    reply["items"]
        .as_array()
        .and_then(|items| items.iter().find_map(|item| item["index"].get("error").cloned()))
        .or_else(|| reply.get("error").cloned())
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

impl IndexSink for ElasticsearchSink {
    fn send_file(&mut self, fields: &NodeFields, entry: &Entry) -> Result<IndexOutcome, SinkError> {
        let Some(batches) = read_documents(fields, entry, self.bulk_size)? else {
            return Ok(IndexOutcome::Undecodable);
        };

        debug!("Indexing: {}", entry);
        let path = entry.abspath();
        let mut indexed = 0;
        for batch in batches {
            let batch = batch?;
            self.bulk(&batch, &path)?;
            indexed += batch.len();
        }
        debug!("Indexed: {}", entry);
        Ok(IndexOutcome::Indexed(indexed))
    }
}
