//! Split documents at their endnote markers.
//!
//! Usage:
//!   docsplit split --source exam.hwp --output-dir out/
//!   docsplit split --source exam.hwp --output-dir out/ --format TEXT --drop-leading --report report.json
//!   docsplit markers --source exam.hwp
//!   docsplit manifest --manifest jobs.csv --output-dir out/ --parallel
//!
//! Exit codes: 0 when every block was extracted, 2 when the run completed with
//! failed blocks, 1 when a run aborted or the arguments were invalid.

use clap::{Args, Parser, Subcommand};
use docsplit::batch::{BatchOrchestrator, BatchReport, RunStatus};
use docsplit::extract::{BlockStatus, ExtractionResult};
use docsplit::host::memory::MemoryHostFactory;
use docsplit::host::{DocumentFormat, HostFactory};
use docsplit::manifest::{Manifest, ManifestReport, ManifestRunner};
use docsplit::segment::EmptyBlockPolicy;
use docsplit::{Result, SplitConfig};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "docsplit")]
#[command(version, about = "Split word-processor documents into one file per endnote marker")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every block of one document
    Split {
        /// Source document
        #[arg(long)]
        source: PathBuf,

        /// Directory receiving one file per block
        #[arg(long)]
        output_dir: PathBuf,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        options: SplitArgs,
    },
    /// List marker anchors and planned blocks without extracting
    Markers {
        /// Source document
        #[arg(long)]
        source: PathBuf,

        #[command(flatten)]
        options: SplitArgs,
    },
    /// Extract the blocks listed in a manifest
    Manifest {
        /// JSON array or comma-separated file with id, ordinal, source, db_key columns
        #[arg(long)]
        manifest: PathBuf,

        /// Directory relative sources are resolved against (default: the manifest's directory)
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Directory receiving the extracted blocks
        #[arg(long)]
        output_dir: PathBuf,

        /// Process distinct documents concurrently
        #[arg(long)]
        parallel: bool,

        /// Write the manifest report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        options: SplitArgs,
    },
}

/// Settings shared by all subcommands; flags override the config file.
#[derive(Args, Debug)]
struct SplitArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format: HWP, HWPX, HTML, TEXT or RTF
    #[arg(long)]
    format: Option<DocumentFormat>,

    /// Output file name template, e.g. "{stem}_{index:03}.{ext}"
    #[arg(long)]
    name_pattern: Option<String>,

    /// Control kind treated as a marker
    #[arg(long)]
    marker_kind: Option<String>,

    /// Do not extract the content before the first marker
    #[arg(long)]
    drop_leading: bool,

    /// Do not extract the content after the last marker
    #[arg(long)]
    drop_trailing: bool,

    /// Drop empty blocks before numbering instead of reporting them as skipped
    #[arg(long)]
    drop_empty: bool,

    /// Show the host window
    #[arg(long)]
    visible: bool,
}

impl SplitArgs {
    fn to_config(&self) -> Result<SplitConfig> {
        let mut config = match &self.config {
            Some(path) => SplitConfig::from_file(path)?,
            None => SplitConfig::default(),
        };
        if let Some(format) = self.format {
            config = config.with_format(format);
        }
        if let Some(pattern) = &self.name_pattern {
            config = config.with_name_pattern(pattern.clone());
        }
        if let Some(kind) = &self.marker_kind {
            config = config.with_marker_kind(kind.clone());
        }
        if self.drop_leading {
            config = config.with_leading_block(false);
        }
        if self.drop_trailing {
            config = config.with_trailing_block(false);
        }
        if self.drop_empty {
            config = config.with_empty_blocks(EmptyBlockPolicy::Drop);
        }
        if self.visible {
            let session = config.session.clone().with_visible(true);
            config = config.with_session(session);
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version land here too
            return if e.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        },
    };

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let factory: Arc<dyn HostFactory> = Arc::new(MemoryHostFactory::new());
    let outcome = match cli.command {
        Command::Split {
            source,
            output_dir,
            report,
            options,
        } => run_split(factory, &source, &output_dir, report.as_deref(), &options),
        Command::Markers { source, options } => run_markers(factory, &source, &options),
        Command::Manifest {
            manifest,
            base_dir,
            output_dir,
            parallel,
            report,
            options,
        } => run_manifest(
            factory,
            &manifest,
            base_dir.as_deref(),
            &output_dir,
            parallel,
            report.as_deref(),
            &options,
        ),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        },
    }
}

fn run_split(
    factory: Arc<dyn HostFactory>,
    source: &Path,
    output_dir: &Path,
    report_path: Option<&Path>,
    options: &SplitArgs,
) -> Result<ExitCode> {
    let config = options.to_config()?;

    println!("Document Splitter");
    println!("=================");
    println!("Source: {}", source.display());
    println!("Output directory: {}", output_dir.display());
    println!("Format: {}", config.format);
    println!();

    let start = Instant::now();
    let mut orchestrator = BatchOrchestrator::new(factory, config)?.with_progress(print_progress);
    let report = orchestrator.run(source, output_dir);
    let elapsed = start.elapsed();

    print_summary(&report, elapsed);
    if let Some(path) = report_path {
        fs::write(path, report.to_json()?)?;
        println!("Report: {}", path.display());
    }
    Ok(exit_code(&report))
}

fn print_progress(result: &ExtractionResult, total: usize) {
    print!("[{}/{}] Block {} {} ... ", result.block_index, total, result.block_index, result.block);
    let _ = std::io::stdout().flush();
    match result.status {
        BlockStatus::Extracted => println!(
            "✓ {} ({} bytes)",
            result
                .output_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            result.byte_size.unwrap_or(0)
        ),
        BlockStatus::Skipped => println!("- {}", result.note.as_deref().unwrap_or("skipped")),
        BlockStatus::Failed => println!(
            "✗ Error: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn print_summary(report: &BatchReport, elapsed: std::time::Duration) {
    println!("\n{}", "=".repeat(70));
    match &report.status {
        RunStatus::Completed => println!("Split Complete"),
        RunStatus::Aborted { reason } => println!("Split Aborted: {}", reason),
    }
    println!("{}", "=".repeat(70));
    println!("Markers: {}", report.marker_count);
    println!("Extracted: {}/{}", report.summary.succeeded, report.planned_blocks);
    println!("Failed: {}", report.summary.failed);
    println!("Skipped: {}", report.summary.skipped);
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    println!("Time: {:?}", elapsed);
    println!("Run: {}", report.run_id);
    println!("{}", "=".repeat(70));
}

fn exit_code(report: &BatchReport) -> ExitCode {
    if !report.is_completed() {
        ExitCode::from(1)
    } else if report.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn run_markers(factory: Arc<dyn HostFactory>, source: &Path, options: &SplitArgs) -> Result<ExitCode> {
    let config = options.to_config()?;
    let kind = config.marker_kind.clone();
    let mut orchestrator = BatchOrchestrator::new(factory, config)?;
    let survey = orchestrator.survey(source)?;

    println!("{} '{}' markers in {}", survey.scan.markers.len(), kind, source.display());
    for (i, marker) in survey.scan.markers.iter().enumerate() {
        println!("  #{:<4} {} (control {})", i + 1, marker.anchor, marker.ordinal);
    }
    for warning in &survey.scan.warnings {
        println!("  skipped control {}: {}", warning.ordinal, warning.reason);
    }
    println!();
    println!("Document: {} .. {}", survey.doc_start, survey.doc_end);
    println!("{} planned blocks:", survey.plan.len());
    for planned in survey.plan.iter() {
        let note = if planned.block.is_empty() { " (empty)" } else { "" };
        println!("  {:>4}  {}{}", planned.ordinal, planned.block, note);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_manifest(
    factory: Arc<dyn HostFactory>,
    manifest_path: &Path,
    base_dir: Option<&Path>,
    output_dir: &Path,
    parallel: bool,
    report_path: Option<&Path>,
    options: &SplitArgs,
) -> Result<ExitCode> {
    let config = options.to_config()?;
    let manifest = Manifest::load(manifest_path)?;
    let base_dir = base_dir
        .map(Path::to_path_buf)
        .or_else(|| manifest_path.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    let start = Instant::now();
    let runner = ManifestRunner::new(factory, config)?.with_parallel(parallel);
    let report = runner.run(&manifest, &base_dir, output_dir);
    let elapsed = start.elapsed();

    print_manifest_summary(&report, elapsed);
    if let Some(path) = report_path {
        fs::write(path, report.to_json()?)?;
        println!("Report: {}", path.display());
    }

    Ok(if report.aborted() > 0 {
        ExitCode::from(1)
    } else if report.unresolved() > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_manifest_summary(report: &ManifestReport, elapsed: std::time::Duration) {
    for entry in &report.entries {
        match (&entry.output_path, &entry.error) {
            (Some(path), _) => println!("✓ {} -> {}", entry.id, path.display()),
            (None, Some(error)) => println!("✗ {} ({} #{}): {}", entry.id, entry.source.display(), entry.ordinal, error),
            (None, None) => println!("- {} ({} #{}): skipped", entry.id, entry.source.display(), entry.ordinal),
        }
    }

    println!("\n{}", "=".repeat(70));
    println!("Manifest Complete");
    println!("{}", "=".repeat(70));
    println!("Documents: {} ({} aborted)", report.documents.len(), report.aborted());
    println!("Extracted: {}/{}", report.extracted(), report.entries.len());
    println!("Time: {:?}", elapsed);
    println!("{}", "=".repeat(70));
}
