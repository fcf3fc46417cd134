//! Process command - extract data from individual files or glob patterns.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use tracing::{info, warn};

use invex_core::documents::DocumentFormat;
use invex_core::{BatchOrchestrator, TaskStatus};

use super::output::{OutputFormat, format_records};
use super::{ExtractionArgs, ctrl_c_token, load_config};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    #[command(flatten)]
    extraction: ExtractionArgs,
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    args.extraction.apply(&mut config);
    // One-off extraction: no progress log, no classification.
    config.batch.resume = false;
    config.output.classify = false;

    let mut files = Vec::new();
    for pattern in &args.inputs {
        let before = files.len();
        for entry in glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() && DocumentFormat::from_path(&path).is_some() => {
                    files.push(path)
                }
                Ok(path) => info!("Ignoring {}", path.display()),
                Err(e) => warn!("Cannot read {}: {}", e.path().display(), e),
            }
        }
        if files.len() == before {
            warn!("No matching files for pattern: {}", pattern);
        }
    }
    if files.is_empty() {
        anyhow::bail!("No matching files found for: {}", args.inputs.join(" "));
    }

    let orchestrator = BatchOrchestrator::from_config(&config).await?;
    let report = orchestrator.run(files, ctrl_c_token()).await?;

    for outcome in &report.outcomes {
        if outcome.status != TaskStatus::Done {
            eprintln!(
                "{} {} {}: {}",
                style("✗").red(),
                outcome.status,
                outcome.path.display(),
                outcome.last_error.as_deref().unwrap_or("")
            );
        }
    }

    let records: Vec<_> = report.records().collect();
    let output = format_records(&records, args.format)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        eprintln!(
            "{} Wrote {} records to {} in {:?}",
            style("✓").green(),
            records.len(),
            output_path.display(),
            start.elapsed()
        );
    } else {
        println!("{}", output);
    }

    if records.is_empty() {
        anyhow::bail!("No invoice data extracted");
    }
    Ok(())
}
