// src/main.rs — Riff entry point

use std::io::Read;

use clap::Parser;

use riff::cli::{Cli, Commands};
use riff::core::extractor::extract_pattern;
use riff::infra::config::Config;
use riff::infra::logger;
use riff::provider::resolver;
use riff::provider::ModelRef;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // API keys may live in ./.env
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    logger::init_logging(if cli.verbose { "debug" } else { "warn" });

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Load config (falls back to defaults if no config.toml)
    let mut config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };
    apply_overrides(&mut config, &cli)?;

    match cli.command {
        Some(Commands::Extract { languages }) => {
            let languages = if languages.is_empty() {
                config.extractor.languages
            } else {
                languages
            };
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            match extract_pattern(&text, &languages) {
                Some(pattern) => {
                    println!("{pattern}");
                    Ok(0)
                }
                None => Ok(1),
            }
        }
        Some(Commands::Chat) | None => {
            let model_ref = ModelRef::new(config.model.provider.clone(), config.model.model.clone());
            let provider = resolver::resolve_provider(&model_ref, config.model.base_url.as_deref())?;
            tracing::info!(provider = provider.name(), model = %model_ref, "Provider resolved");

            riff::cli::chat::run_chat(provider, &model_ref, &config).await?;
            Ok(0)
        }
    }
}

/// CLI flags win over config.toml.
fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(ref model) = cli.model {
        match ModelRef::parse(model) {
            Some(r) => {
                config.model.provider = r.provider;
                config.model.model = r.model;
            }
            // Bare model name: keep the configured provider
            None if !model.contains('/') && !model.is_empty() => {
                config.model.model = model.clone();
            }
            None => anyhow::bail!("Invalid model '{model}'. Use provider/model."),
        }
    }
    if let Some(ref player) = cli.player {
        config.player.command = player.clone();
    }
    if let Some(n) = cli.max_corrections {
        config.retry.max_corrections = n;
    }
    Ok(())
}
