//! Remaster matcher
//!
//! Usage:
//!   remaster-match match -o originals/ -r remasters/   - Match remasters to originals
//!   remaster-match probe track.mp3                     - Diagnose a file that fails to load
//!   remaster-match config --write matcher.json         - Write the default configuration

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use rm_match::scan::collect_inputs;
use rm_match::{
    AudioIngest, MatchConfig, MatchReport, MatchWorker, ReportFormat, WorkerEvent, format_duration,
};

#[derive(Parser)]
#[command(name = "remaster-match", about = "Find the original recording behind each remaster")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match remasters against original references
    Match {
        /// Original files or directories
        #[arg(short, long, required = true, num_args = 1..)]
        originals: Vec<PathBuf>,

        /// Remaster files or directories
        #[arg(short, long, required = true, num_args = 1..)]
        remasters: Vec<PathBuf>,

        /// Minimum similarity reported as a match
        #[arg(short, long)]
        threshold: Option<f64>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the report to this file
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Export format (text, json, csv); defaults to the export extension
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Print container details and try decoding
    Probe {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Configuration helpers
    Config {
        /// Write the default configuration to this file
        #[arg(short, long)]
        write: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Match {
            originals,
            remasters,
            threshold,
            config,
            export,
            format,
        } => run_match(&originals, &remasters, threshold, config, export, format),
        Commands::Probe { files } => probe_files(&files),
        Commands::Config { write } => write_config(&write),
    }
}

fn load_config(path: Option<PathBuf>, threshold: Option<f64>) -> Result<MatchConfig> {
    let mut config = match path {
        Some(path) => MatchConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MatchConfig::default(),
    };

    if let Some(threshold) = threshold {
        config = config.with_threshold(threshold);
    }
    config.validate().context("Invalid configuration")?;
    log::debug!("Using {:?}", config);
    Ok(config)
}

fn run_match(
    originals: &[PathBuf],
    remasters: &[PathBuf],
    threshold: Option<f64>,
    config: Option<PathBuf>,
    export: Option<PathBuf>,
    format: Option<String>,
) -> Result<()> {
    let config = load_config(config, threshold)?;

    let references = collect_inputs(originals);
    let queries = collect_inputs(remasters);
    if references.is_empty() {
        bail!("No audio files found among the originals");
    }
    if queries.is_empty() {
        bail!("No audio files found among the remasters");
    }

    let export_format = match (&export, format) {
        (_, Some(name)) => Some(name.parse::<ReportFormat>()?),
        (Some(path), None) => Some(ReportFormat::from_extension(path).unwrap_or_default()),
        (None, None) => None,
    };

    eprintln!(
        "Matching {} remasters against {} originals (threshold {:.2})",
        queries.len(),
        references.len(),
        config.threshold
    );

    let started = Instant::now();
    let threshold = config.threshold;
    let handle = MatchWorker::new(references, queries, config)
        .spawn()
        .context("Failed to start worker")?;

    for event in handle.events().iter() {
        match &event {
            WorkerEvent::Progress { percent, message } => eprintln!("[{:>3}%] {}", percent, message),
            WorkerEvent::FileSkipped { path, stage, reason } => {
                eprintln!("  skipped {} file {}: {}", stage, path.display(), reason)
            }
            WorkerEvent::QueryFinished(record) => eprintln!(
                "  {} -> {} ({:.3}, {})",
                record.query_name,
                record.matched,
                record.similarity,
                record.confidence().label()
            ),
            WorkerEvent::Finished { .. } | WorkerEvent::Failed { .. } => {}
        }
        if event.is_terminal() {
            break;
        }
    }

    let summary = handle.join().context("Worker thread failed")?;
    let report = MatchReport::new("Remaster Match Report", threshold).with_records(summary.records);

    println!("{}", report.generate(ReportFormat::Text)?);
    eprintln!("{} in {:.1}s", report.summary(), started.elapsed().as_secs_f64());

    if let (Some(path), Some(format)) = (export, export_format) {
        report
            .save(&path, format)
            .with_context(|| format!("Failed to export report to {}", path.display()))?;
        eprintln!("Report written to {}", path.display());
    }

    if let Some(reason) = summary.error {
        bail!("Matching failed: {}", reason);
    }
    if summary.cancelled {
        eprintln!("Stopped early; {} files matched", report.total());
    }
    Ok(())
}

fn probe_files(files: &[PathBuf]) -> Result<()> {
    let mut failures = 0;
    for path in files {
        println!("{}", path.display());
        if let Err(e) = probe_file(path) {
            println!("  FAILED: {:#}", e);
            failures += 1;
        }
        println!();
    }

    if failures > 0 {
        bail!("{} of {} files could not be decoded", failures, files.len());
    }
    Ok(())
}

fn probe_file(path: &Path) -> Result<()> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat {}", path.display()))?
        .len();
    println!("  size:        {} bytes", size);

    let mut header = [0u8; 16];
    let read = std::fs::File::open(path)
        .and_then(|mut file| file.read(&mut header))
        .context("Cannot read header")?;
    let hex: Vec<String> = header[..read].iter().map(|b| format!("{:02x}", b)).collect();
    println!("  header:      {}", hex.join(" "));

    match AudioIngest::probe(path) {
        Ok(info) => {
            println!("  format:      {}", info.format);
            println!("  sample rate: {} Hz", info.sample_rate);
            println!("  channels:    {}", info.channels);
        }
        Err(e) => println!("  probe:       {}", e),
    }
    println!("  duration:    {}", format_duration(AudioIngest::full_duration(path)));

    let started = Instant::now();
    let (samples, rate) = AudioIngest::decode_mono(path, Some(10.0))?;
    println!(
        "  decode:      {} samples at {} Hz in {:.0} ms",
        samples.len(),
        rate,
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn write_config(path: &Path) -> Result<()> {
    MatchConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Default configuration written to {}", path.display());
    Ok(())
}
