mod cli;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use dotenv::dotenv;
use tracing::{error, info, warn};

use cli::commands::Cli;
use cli::progress::CliReporter;
use logjam_ingest::archive::Extractor;
use logjam_ingest::ingest::IngestReport;
use logjam_ingest::{config, ingest_log_files, CancelToken, Entry, IngestOptions};

/// Per-run scratch directory, removed again when the run ends for any reason.
struct ScratchSpace {
    dir: PathBuf,
}

impl ScratchSpace {
    fn create(parent: &Path) -> Result<Self> {
        let dir = parent.join(format!("scratch-space-{}", chrono::Utc::now().timestamp()));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create scratch space {}", dir.display()))?;
        let dir = dir
            .canonicalize()
            .with_context(|| format!("Could not resolve scratch space {}", dir.display()))?;
        Ok(Self { dir })
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if let Err(e) = Entry::root(&self.dir).delete() {
            warn!("Could not remove scratch space {}: {}", self.dir.display(), e);
        }
    }
}

const EXIT_USAGE: i32 = 1;
const EXIT_FAILURE: i32 = 2;

fn main() {
    dotenv().ok();

    let args = Cli::parse();
    if !args.input_dir.is_dir() {
        eprintln!(
            "{} input directory does not exist: {}",
            "error:".red().bold(),
            args.input_dir.display()
        );
        eprintln!("{}", Cli::command().render_usage());
        process::exit(EXIT_USAGE);
    }

    let guard = cli::logging::init_logger(args.log_level.as_deref());
    let code = match run(&args) {
        Ok(()) => 0,
        Err(err) => {
            error!("Error: {:#}", err);
            EXIT_FAILURE
        }
    };
    // Flush the file appender before exiting.
    drop(guard);
    process::exit(code);
}

fn run(args: &Cli) -> Result<()> {
    let mut settings = config::load_configuration().context("Failed to load configuration")?;
    args.apply_overrides(&mut settings);
    if args.print_config {
        println!("{:#?}", settings);
    }

    settings
        .sink
        .prepare()
        .context("Document sink is not usable")?;

    let input_dir = args
        .input_dir
        .canonicalize()
        .with_context(|| format!("Could not resolve {}", args.input_dir.display()))?;
    let scratch = ScratchSpace::create(&settings.scratch_dir)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if !handler_token.is_cancelled() {
            eprintln!("\n  {} Interrupted, finishing current work...", "!".yellow().bold());
        }
        handler_token.cancel();
    })
    .context("Could not install interrupt handler")?;

    let options = IngestOptions {
        processors: settings.processors,
        settings: settings.scan_settings(),
        extractor: Extractor::new(settings.seven_zip_program.clone()),
        ignore_patterns: settings.ignore_patterns.clone(),
        cancel,
    };

    info!("Scratch space: {}", scratch.dir.display());
    let reporter = CliReporter::new();
    let report = ingest_log_files(
        &input_dir,
        &scratch.dir,
        &settings.history_dir,
        &settings.sink,
        &reporter,
        &options,
    )
    .with_context(|| format!("Ingest of {} failed", input_dir.display()))?;

    print_summary(&report);

    if let Some(csv_path) = &args.stats_csv {
        report
            .stats
            .write_csv(csv_path)
            .with_context(|| format!("Could not write statistics to {}", csv_path.display()))?;
        info!("Statistics appended to {}", csv_path.display());
    }
    Ok(())
}

fn print_summary(report: &IngestReport) {
    let totals = report.stats.totals();
    println!();
    if report.cancelled {
        println!("{}", "Ingest interrupted; progress was saved".yellow().bold());
    } else {
        println!("{}", "Ingest finished".green().bold());
    }
    println!("  {:<20} {}", "Cases dispatched:".cyan(), report.cases_dispatched);
    println!("  {:<20} {}", "Cases scanned:".cyan(), report.stats.case_count());
    println!("  {:<20} {}", "Files indexed:".cyan(), totals.files_indexed);
    println!("  {:<20} {}", "Files skipped:".cyan(), totals.files_skipped);
    println!("  {:<20} {}", "Documents:".cyan(), totals.documents);
    println!("  {:<20} {}", "Archives extracted:".cyan(), totals.archives_extracted);
    if totals.archive_failures > 0 || totals.sink_failures > 0 {
        println!(
            "  {:<20} {}",
            "Archive failures:".red(),
            totals.archive_failures
        );
        println!("  {:<20} {}", "Sink failures:".red(), totals.sink_failures);
    }
}
