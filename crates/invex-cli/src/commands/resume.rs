//! Resume command - inspect and maintain the progress log.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use console::style;

use invex_core::{ResumeStore, TaskStatus};

use super::load_config;

/// Arguments for the resume command.
#[derive(Args)]
pub struct ResumeArgs {
    /// Progress log (default: from configuration)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: ResumeCommand,
}

#[derive(Subcommand)]
enum ResumeCommand {
    /// Show per-status counts
    Status {
        /// List failed documents with their last error
        #[arg(long)]
        failed: bool,
    },

    /// Rewrite the log keeping only the latest entry per document
    Compact,
}

pub async fn run(args: ResumeArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let path = match args.file {
        Some(path) => path,
        None => load_config(config_path)?.resume_path(),
    };
    if !path.exists() {
        println!(
            "{} No progress log at {}",
            style("ℹ").blue(),
            path.display()
        );
        return Ok(());
    }

    let store = ResumeStore::open(&path).await?;
    match args.command {
        ResumeCommand::Status { failed } => show_status(&store, failed),
        ResumeCommand::Compact => {
            let kept = store.compact().await?;
            println!(
                "{} Compacted {} to {} entries",
                style("✓").green(),
                path.display(),
                kept
            );
            Ok(())
        }
    }
}

fn show_status(store: &ResumeStore, list_failed: bool) -> anyhow::Result<()> {
    let entries = store.entries();
    let count = |status: TaskStatus| entries.iter().filter(|e| e.status == status).count();

    println!("Progress log: {}", store.path().display());
    println!("  {} documents", entries.len());
    println!("  {} done", style(count(TaskStatus::Done)).green());
    println!("  {} failed", style(count(TaskStatus::Failed)).red());
    println!("  {} skipped", style(count(TaskStatus::Skipped)).yellow());

    if let Some(last) = entries.iter().map(|e| e.timestamp).max() {
        println!("  last update {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if list_failed {
        println!();
        for entry in entries.iter().filter(|e| e.status == TaskStatus::Failed) {
            println!(
                "  - {} ({} attempts): {}",
                entry.path.display(),
                entry.attempt_count,
                entry.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}
