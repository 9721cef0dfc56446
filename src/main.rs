//! Command line entry point for Icon Forge

use clap::{Args, Parser, Subcommand};
use icon_forge::{
    config::Settings,
    pipeline::{split_list, GenerationPipeline, GenerationRequest, ModelSelection},
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "icon-forge", version, about = "Multi-provider icon generation pipeline")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show provider availability and configuration
    Status,
    /// List the models of every available provider
    ListModels,
    /// Generate images
    Generate(GenerateArgs),
    /// Post-process existing images
    Process(ProcessArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Use every model of every available provider
    #[arg(long, conflicts_with = "models")]
    all: bool,
    /// Comma separated model specs, e.g. `flux_dev,openai:dalle3`
    #[arg(long)]
    models: Option<String>,
    /// Comma separated prompt ids
    #[arg(long)]
    prompts: Option<String>,
    /// Worker pool size
    #[arg(long)]
    workers: Option<usize>,
    /// Post-process the generated images
    #[arg(long)]
    process: bool,
    #[arg(long)]
    remove_bg: bool,
    #[arg(long)]
    create_ico: bool,
}

#[derive(Args)]
struct ProcessArgs {
    /// Directory to read images from (defaults to the raw output directory)
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    remove_bg: bool,
    #[arg(long)]
    create_ico: bool,
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load()?,
    };
    init_logging(&settings);
    settings.output.ensure_directories()?;

    let pipeline = GenerationPipeline::new(settings);

    match cli.command {
        Command::Status => status(&pipeline).await,
        Command::ListModels => list_models(&pipeline).await,
        Command::Generate(args) => generate(&pipeline, args).await,
        Command::Process(args) => process(&pipeline, args).await,
    }
}

async fn status(pipeline: &GenerationPipeline) -> anyhow::Result<()> {
    let availability = pipeline.registry().initialize().await;

    println!("Providers:");
    for (provider, available) in &availability {
        let mark = if *available { "ok" } else { "unavailable" };
        println!("  {:<12} {}", provider, mark);
    }
    println!("Models available: {}", pipeline.registry().model_count());

    let output = &pipeline.settings().output;
    println!("Directories:");
    println!("  raw        {}", output.raw_dir.display());
    println!("  processed  {}", output.processed_dir.display());
    println!("  icons      {}", output.icons_dir.display());
    println!("  logs       {}", output.logs_dir.display());

    match pipeline.load_prompts().await {
        Ok(prompts) => println!("Prompts: {}", prompts.len()),
        Err(e) => println!("Prompts: unavailable ({})", e),
    }
    Ok(())
}

async fn list_models(pipeline: &GenerationPipeline) -> anyhow::Result<()> {
    pipeline.initialize().await?;
    for (provider, models) in pipeline.registry().available_models() {
        println!("{}:", provider);
        for model in models {
            println!("  {}:{}", provider, model);
        }
    }
    Ok(())
}

async fn generate(pipeline: &GenerationPipeline, args: GenerateArgs) -> anyhow::Result<()> {
    let selection = match (&args.models, args.all) {
        (Some(models), _) => ModelSelection::from_list(models),
        (None, true) => ModelSelection::All,
        (None, false) => anyhow::bail!("pass --all or --models"),
    };
    let request = GenerationRequest {
        selection,
        prompt_ids: args.prompts.as_deref().map(split_list),
        max_workers: args.workers,
    };

    let generation = pipeline.generate(&request).await?;
    let stats = &generation.statistics;
    println!(
        "Generated {}/{} images ({} skipped) in {:.1}s, success rate {:.0}%",
        stats.successful,
        stats.executed,
        stats.skipped,
        stats.total_time,
        stats.success_rate * 100.0
    );
    if !stats.failed_models.is_empty() {
        println!("Failed models: {}", stats.failed_models.join(", "));
    }

    let path = if args.process || args.remove_bg || args.create_ico {
        let (remove_bg, create_ico) = processing_flags(pipeline, args.remove_bg, args.create_ico);
        let report = pipeline.finish(generation, remove_bg, create_ico).await;
        println!(
            "Processed {} images, created {} icons",
            report.summary.images_processed, report.summary.ico_files_created
        );
        pipeline.save_report(&report).await?
    } else {
        pipeline.save_report(&generation).await?
    };
    info!(path = %path.display(), "Report written");
    Ok(())
}

async fn process(pipeline: &GenerationPipeline, args: ProcessArgs) -> anyhow::Result<()> {
    let (remove_bg, create_ico) = processing_flags(pipeline, args.remove_bg, args.create_ico);
    let output = pipeline
        .process_directory(args.input.as_deref(), remove_bg, create_ico)
        .await?;
    println!(
        "Processed {} images, created {} icons",
        output.processed.len(),
        output.icons.len()
    );
    Ok(())
}

/// Explicit flags win; with neither given fall back to configuration
fn processing_flags(pipeline: &GenerationPipeline, remove_bg: bool, create_ico: bool) -> (bool, bool) {
    if remove_bg || create_ico {
        return (remove_bg, create_ico);
    }
    let processing = &pipeline.settings().processing;
    if !processing.remove_background && !processing.create_ico {
        warn!("Post-processing disabled in configuration");
    }
    (processing.remove_background, processing.create_ico)
}
