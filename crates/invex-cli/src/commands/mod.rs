//! CLI subcommands and the helpers they share.

pub mod config;
pub mod output;
pub mod process;
pub mod providers;
pub mod resume;
pub mod run;

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use invex_core::batch::{BatchProgress, BatchStats, TaskOutcome};
use invex_core::models::config::{InvexConfig, ProviderConfig, ProviderKind};
use invex_core::{ExtractionMode, TaskStatus};

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invex")
        .join("config.json")
}

/// Load the configuration from `config_path`, the default location, or defaults.
///
/// API keys missing from the file are taken from the provider's environment variable.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<InvexConfig> {
    let mut config = match config_path {
        Some(path) => InvexConfig::from_file(Path::new(path))?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                debug!("Using config file {}", default_path.display());
                InvexConfig::from_file(&default_path)?
            } else {
                InvexConfig::default()
            }
        }
    };

    if let Some(provider) = config.provider.as_mut() {
        provider.resolve_api_key_from_env();
    }
    Ok(config)
}

/// Extraction options shared by `run` and `process`.
#[derive(Args, Debug, Default)]
pub struct ExtractionArgs {
    /// Extraction mode (hybrid, llm, vision, regex)
    #[arg(short, long)]
    pub mode: Option<ExtractionMode>,

    /// Provider backend (openai, deepseek, gemini, ollama)
    #[arg(short, long)]
    pub provider: Option<ProviderKind>,

    /// Model name
    #[arg(long)]
    pub model: Option<String>,

    /// Provider base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Number of parallel workers
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Maximum attempts per document
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Fail instead of falling back to pattern extraction when the provider is unreachable
    #[arg(long)]
    pub no_fallback: bool,
}

impl ExtractionArgs {
    pub fn apply(&self, config: &mut InvexConfig) {
        if let Some(mode) = self.mode {
            config.extraction.mode = mode;
        }
        if let Some(kind) = self.provider {
            let replace = config.provider.as_ref().is_none_or(|p| p.kind != kind);
            if replace {
                let mut provider = ProviderConfig::new(kind);
                provider.resolve_api_key_from_env();
                config.provider = Some(provider);
            }
        }
        if let Some(provider) = config.provider.as_mut() {
            if let Some(model) = &self.model {
                provider.model = Some(model.clone());
            }
            if let Some(base_url) = &self.base_url {
                provider.base_url = Some(base_url.clone());
            }
        } else if self.model.is_some() || self.base_url.is_some() {
            warn!("--model and --base-url are ignored without a provider");
        }
        if let Some(jobs) = self.jobs {
            config.batch.workers = jobs;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.batch.max_attempts = max_attempts;
        }
        if self.no_fallback {
            config.batch.allow_fallback = false;
        }
    }
}

/// Cancellation token tripped by Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Interrupted, finishing in-flight documents...",
                style("!").yellow()
            );
            trigger.cancel();
        }
    });
    token
}

/// Progress bar driven by batch callbacks.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> anyhow::Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=>-"),
        );
        Ok(Self { bar })
    }
}

impl BatchProgress for BarProgress {
    fn batch_started(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn task_started(&self, path: &Path) {
        if let Some(name) = path.file_name() {
            self.bar.set_message(name.to_string_lossy().into_owned());
        }
    }

    fn task_finished(&self, outcome: &TaskOutcome) {
        if outcome.status == TaskStatus::Failed {
            self.bar.println(format!(
                "{} {}: {}",
                style("✗").red(),
                outcome.path.display(),
                outcome.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
        self.bar.inc(1);
    }

    fn batch_completed(&self, _stats: &BatchStats) {
        self.bar.finish_with_message("Complete");
    }
}
