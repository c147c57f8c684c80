use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;

use crate::incremental::ScanSettings;
use crate::sink::SinkSettings;

fn default_history_dir() -> PathBuf {
    PathBuf::from("data/scan-history")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_autosave_period_secs() -> i64 {
    120
}

fn default_safe_time_offset_secs() -> i64 {
    360
}

fn default_seven_zip_program() -> String {
    "7z".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
    /// Parent of the per-run `scratch-space-<epoch>` directory.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default)]
    pub processors: Option<usize>,
    #[serde(default = "default_autosave_period_secs")]
    pub autosave_period_secs: i64,
    #[serde(default = "default_safe_time_offset_secs")]
    pub safe_time_offset_secs: i64,
    #[serde(default = "default_seven_zip_program")]
    pub seven_zip_program: String,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub sink: SinkSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            scratch_dir: default_scratch_dir(),
            processors: None,
            autosave_period_secs: default_autosave_period_secs(),
            safe_time_offset_secs: default_safe_time_offset_secs(),
            seven_zip_program: default_seven_zip_program(),
            ignore_patterns: Vec::new(),
            sink: SinkSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            autosave_period_secs: self.autosave_period_secs,
            safe_time_offset_secs: self.safe_time_offset_secs,
        }
    }
}

/// Reads `Logjam.toml` (if present) and then `LOGJAM__*` environment
/// variables, e.g. `LOGJAM__SINK__KIND=elasticsearch`.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    load_configuration_from("Logjam")
}

pub fn load_configuration_from(file_stem: &str) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix("LOGJAM")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
