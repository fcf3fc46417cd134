//! Providers command - list backends and probe availability.

use clap::{Args, Subcommand};
use console::style;

use invex_core::create_provider;
use invex_core::models::config::{ProviderConfig, ProviderKind};

use super::load_config;

/// Arguments for the providers command.
#[derive(Args)]
pub struct ProvidersArgs {
    #[command(subcommand)]
    command: ProvidersCommand,
}

#[derive(Subcommand)]
enum ProvidersCommand {
    /// List supported providers and their defaults
    List,

    /// Probe a provider (default: the configured one)
    Check {
        /// Provider to probe instead of the configured one
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// Model name
        #[arg(long)]
        model: Option<String>,

        /// Provider base URL
        #[arg(long)]
        base_url: Option<String>,
    },
}

pub async fn run(args: ProvidersArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    match args.command {
        ProvidersCommand::List => {
            list_providers();
            Ok(())
        }
        ProvidersCommand::Check {
            provider,
            model,
            base_url,
        } => {
            let config = load_config(config_path)?;
            let mut provider_config = match (provider, config.provider) {
                (Some(kind), Some(configured)) if configured.kind == kind => configured,
                (Some(kind), _) => {
                    let mut fresh = ProviderConfig::new(kind);
                    fresh.resolve_api_key_from_env();
                    fresh
                }
                (None, Some(configured)) => configured,
                (None, None) => anyhow::bail!(
                    "No provider configured. Use --provider or 'invex config set provider.kind <name>'."
                ),
            };
            if model.is_some() {
                provider_config.model = model;
            }
            if base_url.is_some() {
                provider_config.base_url = base_url;
            }
            check_provider(&provider_config).await
        }
    }
}

fn list_providers() {
    for kind in ProviderKind::ALL {
        let key = match kind.api_key_env() {
            Some(var) if std::env::var(var).is_ok_and(|v| !v.trim().is_empty()) => {
                format!("{} {}", var, style("set").green())
            }
            Some(var) => format!("{} {}", var, style("not set").yellow()),
            None => "no API key".to_string(),
        };
        println!("{}", style(kind.as_str()).bold());
        println!("  model:    {}", kind.default_model());
        println!("  endpoint: {}", kind.default_base_url());
        println!("  key:      {}", key);
    }
}

async fn check_provider(config: &ProviderConfig) -> anyhow::Result<()> {
    println!(
        "Checking {} ({}) at {}...",
        config.kind,
        config.model(),
        config.base_url()
    );

    let provider = create_provider(config)?;
    if provider.check_availability().await {
        println!("{} {} is available", style("✓").green(), config.kind);
        Ok(())
    } else {
        anyhow::bail!("{} is not reachable at {}", config.kind, config.base_url())
    }
}
