use std::path::PathBuf;

use clap::Parser;
use logjam_ingest::sink::SinkSettings;
use logjam_ingest::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "logjam-ingest")]
#[command(about = "Incrementally ingest StorageGRID support bundles", long_about = None)]
pub struct Cli {
    /// Log level: trace, debug, info, warning or critical
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Write documents as JSON lines into this directory instead of the configured sink
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Scratch space directory to unzip files into
    #[arg(short = 's', long = "scratch-space-dir")]
    pub scratch_space: Option<PathBuf>,

    /// Directory holding scan history files
    #[arg(long = "history-dir")]
    pub history_dir: Option<PathBuf>,

    /// Number of worker threads (defaults to the CPU count)
    #[arg(short = 'p', long = "processors")]
    pub processors: Option<usize>,

    /// Elasticsearch host, e.g. http://localhost:9200
    #[arg(long = "es-host", conflicts_with = "output_dir")]
    pub es_host: Option<String>,

    /// Append per-case statistics to this CSV file
    #[arg(long = "stats-csv")]
    pub stats_csv: Option<PathBuf>,

    /// Print configuration values before ingesting
    #[arg(long = "print-config")]
    pub print_config: bool,

    /// Directory to scan for StorageGRID files
    pub input_dir: PathBuf,
}

impl Cli {
    /// Command-line flags win over the configuration file and environment.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(scratch) = &self.scratch_space {
            config.scratch_dir = scratch.clone();
        }
        if let Some(history) = &self.history_dir {
            config.history_dir = history.clone();
        }
        if self.processors.is_some() {
            config.processors = self.processors;
        }

        let bulk_size = match &config.sink {
            SinkSettings::Elasticsearch { bulk_size, .. } => *bulk_size,
            SinkSettings::JsonLines { bulk_size, .. } => *bulk_size,
        };
        if let Some(output_dir) = &self.output_dir {
            config.sink = SinkSettings::JsonLines {
                output_dir: output_dir.clone(),
                bulk_size,
            };
        } else if let Some(host) = &self.es_host {
            config.sink = match &config.sink {
                SinkSettings::Elasticsearch {
                    index,
                    mappings_path,
                    ..
                } => SinkSettings::Elasticsearch {
                    host: host.clone(),
                    index: index.clone(),
                    mappings_path: mappings_path.clone(),
                    bulk_size,
                },
                SinkSettings::JsonLines { .. } => SinkSettings::Elasticsearch {
                    host: host.clone(),
                    index: logjam_ingest::sink::DEFAULT_INDEX_NAME.to_string(),
                    mappings_path: None,
                    bulk_size,
                },
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "logjam-ingest",
            "-p",
            "3",
            "--history-dir",
            "/tmp/history",
            "--es-host",
            "http://es:9200",
            "/mnt/nfs",
        ]);
        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.processors, Some(3));
        assert_eq!(config.history_dir, PathBuf::from("/tmp/history"));
        assert_eq!(
            config.sink,
            SinkSettings::Elasticsearch {
                host: "http://es:9200".to_string(),
                index: "logjam".to_string(),
                mappings_path: None,
                bulk_size: 500,
            }
        );
        assert_eq!(cli.input_dir, PathBuf::from("/mnt/nfs"));
    }

    #[test]
    fn test_output_dir_selects_json_lines() {
        let cli = Cli::parse_from(["logjam-ingest", "-o", "/tmp/out", "/mnt/nfs"]);
        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(
            config.sink,
            SinkSettings::JsonLines {
                output_dir: PathBuf::from("/tmp/out"),
                bulk_size: 500,
            }
        );
    }
}
