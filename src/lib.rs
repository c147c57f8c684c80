pub mod archive;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fields;
pub mod incremental;
pub mod ingest;
pub mod paths;
pub mod platform;
pub mod progress;
pub mod sink;
pub mod stats;

pub use cancel::CancelToken;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use fields::{FieldRules, NodeFields};
pub use ingest::{ingest_log_files, IngestOptions};
pub use paths::Entry;
pub use progress::{IngestReporter, SilentReporter};
pub use stats::{CaseStats, IngestStats};
