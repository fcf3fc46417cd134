//! Run command - resumable batch extraction over a directory.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use tracing::debug;

use invex_core::models::config::ClassifyMode;
use invex_core::{BatchOrchestrator, discover};

use super::output::{print_report, write_records, write_summary};
use super::{BarProgress, ExtractionArgs, ctrl_c_token, load_config};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Input directory (or a single file)
    #[arg(required = true)]
    input: PathBuf,

    /// Output directory for the classified tree, reports and progress log
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[command(flatten)]
    extraction: ExtractionArgs,

    /// Reprocess documents completed in earlier runs
    #[arg(long)]
    force: bool,

    /// Do not read or write the progress log
    #[arg(long)]
    no_resume: bool,

    /// Do not copy documents into the seller/buyer tree
    #[arg(long)]
    no_classify: bool,

    /// Move documents into the seller/buyer tree instead of copying
    #[arg(long = "move", conflicts_with = "no_classify")]
    move_files: bool,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    args.extraction.apply(&mut config);
    if let Some(output_dir) = &args.output_dir {
        config.output.output_dir = output_dir.clone();
    }
    if args.force {
        config.batch.force = true;
    }
    if args.no_resume {
        config.batch.resume = false;
    }
    if args.no_classify {
        config.output.classify = false;
    }
    if args.move_files {
        config.output.classify_mode = ClassifyMode::Move;
    }

    if !args.input.exists() {
        anyhow::bail!("Input not found: {}", args.input.display());
    }

    fs::create_dir_all(&config.output.output_dir)?;
    let files = discover(&args.input, Some(&config.output.output_dir));
    if files.is_empty() {
        anyhow::bail!("No supported documents found in {}", args.input.display());
    }

    println!(
        "{} Found {} documents to process",
        style("ℹ").blue(),
        files.len()
    );

    let mut orchestrator = BatchOrchestrator::from_config(&config).await?;
    if !args.quiet {
        orchestrator = orchestrator.with_progress(Arc::new(BarProgress::new()?));
    }
    if let Some(store) = orchestrator.resume_store() {
        debug!("Progress log: {}", store.path().display());
    }

    let report = orchestrator.run(files, ctrl_c_token()).await?;

    let summary_path = config.output.output_dir.join("summary.csv");
    write_summary(&summary_path, &report)?;
    let records_path = config.output.output_dir.join("records.json");
    write_records(&records_path, &report)?;

    print_report(&report, start.elapsed());
    println!();
    println!(
        "{} Summary written to {}",
        style("✓").green(),
        summary_path.display()
    );
    println!(
        "{} Records written to {}",
        style("✓").green(),
        records_path.display()
    );

    Ok(())
}
