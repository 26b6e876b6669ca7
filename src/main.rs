#![allow(clippy::multiple_crate_versions)]

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use curator::config::Config;
use curator::lifecycle::{InitializationState, LifecycleManager};
use curator::models::ModelRegistry;
use curator::suggestions::{CritiqueReport, ImageSequencePlan, MoodPresetSuggestion};
use curator::CuratorError;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "On-device model manager for gallery curation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the configured model catalog
    Catalog,
    /// Initialize the engine and list known models
    Models,
    /// Download a catalog model
    Download {
        /// Model id as printed by `curator catalog`
        id: String,
    },
    /// Load a model and generate a structured response
    Generate {
        id: String,
        prompt: String,
        /// Shape the response is decoded into
        #[arg(long, value_enum, default_value_t = Schema::Raw)]
        schema: Schema,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Schema {
    Raw,
    Mood,
    Sequence,
    Critique,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("curator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let config = Config::load()?;

    match command {
        Commands::Catalog => {
            print_catalog(&ModelRegistry::from_config(&config));
            Ok(())
        }
        Commands::Models => {
            let manager = start(&config).await?;
            for model in manager.models().borrow().iter() {
                let marker = if model.is_downloaded { "*" } else { " " };
                println!("{marker} {:<48} {:<11} {}", model.id, model.category, model.name);
            }
            manager.shutdown().await;
            Ok(())
        }
        Commands::Download { id } => download(&config, &id).await,
        Commands::Generate { id, prompt, schema } => generate(&config, &id, &prompt, schema).await,
    }
}

fn print_catalog(registry: &ModelRegistry) {
    for entry in registry.entries() {
        println!("{:<48} {:<11} {}", entry.model_id(), entry.category, entry.name);
    }
}

/// Initialize and wait for the engine to settle
async fn start(config: &Config) -> anyhow::Result<LifecycleManager> {
    if !config.ai.enabled {
        bail!("AI features are disabled; set [ai] enabled = true in config");
    }

    let manager = LifecycleManager::from_config(config)?;
    manager.initialize();
    match manager.wait_until_settled().await {
        InitializationState::Initialized => Ok(manager),
        InitializationState::Failed(cause) => bail!("Engine initialization failed: {cause}"),
        other => bail!("Engine did not initialize ({other})"),
    }
}

async fn download(config: &Config, id: &str) -> anyhow::Result<()> {
    let registry = ModelRegistry::from_config(config);
    if registry.find(id).is_none() {
        if let Some(suggestion) = registry.suggest(id) {
            eprintln!("Did you mean '{suggestion}'?");
        }
        return Err(CuratorError::UnknownModel(id.to_string()).into());
    }

    let manager = start(config).await?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos:>3}%")
            .context("invalid progress template")?
            .progress_chars("=> "),
    );
    pb.set_message(id.to_string());

    let outcome = manager
        .download_model(id, |fraction| pb.set_position(percent(fraction)))
        .await;

    match &outcome {
        Ok(()) => pb.finish_with_message(format!("{id} downloaded")),
        Err(_) => pb.abandon(),
    }
    manager.shutdown().await;
    outcome.map_err(Into::into)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(fraction: f32) -> u64 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u64
}

async fn generate(config: &Config, id: &str, prompt: &str, schema: Schema) -> anyhow::Result<()> {
    let manager = start(config).await?;
    if !manager.load_model(id).await {
        manager.shutdown().await;
        bail!("Failed to load model '{id}'");
    }

    let pipeline = manager.pipeline();
    let output = match schema {
        Schema::Raw => render(pipeline.generate_json::<serde_json::Value>(prompt).await),
        Schema::Mood => render(pipeline.generate_json::<MoodPresetSuggestion>(prompt).await),
        Schema::Sequence => render(pipeline.generate_json::<ImageSequencePlan>(prompt).await),
        Schema::Critique => {
            let report = pipeline.generate_json::<CritiqueReport>(prompt).await;
            if matches!(&report, Ok(r) if !r.scores_in_range()) {
                tracing::warn!("Critique scores fall outside 0..=100");
            }
            render(report)
        }
    };

    manager.shutdown().await;
    println!("{}", output?);
    Ok(())
}

fn render<T: Serialize>(
    result: curator::generation::GenerationResult<T>,
) -> anyhow::Result<String> {
    let value = result?;
    Ok(serde_json::to_string_pretty(&value)?)
}
