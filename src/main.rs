mod batch;
mod cli;
mod config;
mod error;
mod evaluation;
mod metrics;
mod ollama;
mod prompts;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use batch::{ArtifactStore, BatchOptions, BatchProcessor};
use cli::{Cli, Commands, RunArgs};
use config::Config;
use evaluation::ReferenceDataset;
use metrics::RunMetrics;
use ollama::{BlockingOllamaClient, ChatRequest, OllamaClient};
use report::Report;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env();
    let filter = match format!("command_intent={}", cli.log_level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter.add_directive(LevelFilter::INFO.into()),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env();
    cli.apply(&mut config);
    let config = Arc::new(config);
    config.print_banner();

    match dispatch(&cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: &Commands, config: &Arc<Config>) -> Result<ExitCode> {
    match command {
        Commands::Run(args) => run(args, config).await,
        Commands::Probe => probe(config).await,
        Commands::Ask {
            prompt,
            stream,
            blocking,
            system_prompt_file,
        } => {
            let system = prompts::load_system_prompt(system_prompt_file.as_deref());
            let request = ChatRequest::new(config.model.as_str(), prompt.as_str())
                .with_system(system)
                .with_decoding(config.decoding);
            if *blocking {
                ask_blocking(request, config).await
            } else {
                ask(request, *stream, config).await
            }
        }
        Commands::Evaluate {
            summary_file,
            dataset_file,
        } => evaluate(summary_file, dataset_file.as_deref(), config).await,
        Commands::Models => models(config).await,
    }
}

fn build_client(config: &Config, metrics: Arc<RunMetrics>) -> Result<OllamaClient> {
    OllamaClient::new(config.client.clone(), metrics).context("Failed to create Ollama client")
}

/// Scoring proceeds without ground truth when the dataset cannot be loaded.
fn load_dataset(path: Option<&Path>) -> Option<ReferenceDataset> {
    let path = path?;
    match ReferenceDataset::load(path) {
        Ok(dataset) if dataset.is_empty() => {
            warn!(
                "Dataset {} has no entries; scoring without reference labels",
                path.display()
            );
            None
        }
        Ok(dataset) => Some(dataset),
        Err(e) => {
            warn!("{:#}; scoring without reference labels", anyhow::Error::from(e));
            None
        }
    }
}

async fn run(args: &RunArgs, config: &Arc<Config>) -> Result<ExitCode> {
    let metrics = RunMetrics::new();
    let client = Arc::new(build_client(config, metrics.clone())?);

    info!("Checking model {} at {}", config.model, config.client.base_url);
    let verdict = client.check_model_available(&config.model).await;
    if !verdict.available {
        error!("Model {} is not available: {}", config.model, verdict.diagnostic);
        return Ok(ExitCode::FAILURE);
    }

    let system_prompt = prompts::load_system_prompt(args.system_prompt_file.as_deref());
    let prompt_list = prompts::load_prompts(&args.prompt_source());
    info!(
        "Loaded {} prompts, system prompt {} chars",
        prompt_list.len(),
        system_prompt.chars().count()
    );

    let store = ArtifactStore::new(&config.output_dir, config.raw_dir());
    let processor = BatchProcessor::new(
        client,
        store,
        BatchOptions::from_config(config),
        metrics.clone(),
    );
    let outcome = processor
        .run(&config.model, Some(system_prompt.as_str()), &prompt_list)
        .await
        .context("Batch run aborted")?;

    info!(
        run_id = %outcome.run_id,
        "Processed {}/{} prompts, summary at {}",
        outcome.processed_count,
        outcome.total_count,
        outcome.summary_location.display()
    );

    let dataset = load_dataset(args.dataset_file.as_deref());
    let evaluation = evaluation::evaluate(&outcome.records, dataset.as_ref());
    if evaluation.default_labelled() > 0 {
        warn!(
            "{} of {} records have no ground truth and were scored as negatives",
            evaluation.default_labelled(),
            evaluation.scores.total_count
        );
    }

    if !args.no_report {
        Report::new(config.model.as_str(), evaluation)
            .with_run_metrics(outcome.metrics)
            .write(&config.output_dir)
            .await
            .context("Failed to write report data")?;
    }

    Ok(ExitCode::SUCCESS)
}

async fn probe(config: &Arc<Config>) -> Result<ExitCode> {
    let client = build_client(config, RunMetrics::new())?;
    let verdict = client.check_model_available(&config.model).await;
    if verdict.available {
        info!("Model {} is available at {}", config.model, config.client.base_url);
        Ok(ExitCode::SUCCESS)
    } else {
        error!("Model {} is not available: {}", config.model, verdict.diagnostic);
        Ok(ExitCode::from(1))
    }
}

async fn ask(request: ChatRequest, stream: bool, config: &Arc<Config>) -> Result<ExitCode> {
    let client = build_client(config, RunMetrics::new())?;

    if !stream {
        let reply = client.send(&request).await.context("Request failed")?;
        println!("{}", reply);
        return Ok(ExitCode::SUCCESS);
    }

    let mut increments = client.stream(&request).await.context("Failed to open stream")?;
    let mut stdout = std::io::stdout();
    while let Some(increment) = increments.next().await {
        let text = increment.context("Stream interrupted")?;
        write!(stdout, "{}", text).context("Failed to write to stdout")?;
        stdout.flush().context("Failed to write to stdout")?;
    }
    writeln!(stdout).context("Failed to write to stdout")?;
    Ok(ExitCode::SUCCESS)
}

async fn ask_blocking(request: ChatRequest, config: &Arc<Config>) -> Result<ExitCode> {
    let client_config = config.client.clone();
    let reply = tokio::task::spawn_blocking(move || -> Result<String> {
        let client = BlockingOllamaClient::new(client_config, RunMetrics::new())
            .context("Failed to create blocking client")?;
        client.send(&request).context("Request failed")
    })
    .await
    .context("Blocking request task panicked")??;

    println!("{}", reply);
    Ok(ExitCode::SUCCESS)
}

async fn evaluate(
    summary_file: &Path,
    dataset_file: Option<&Path>,
    config: &Arc<Config>,
) -> Result<ExitCode> {
    let records = batch::read_summary(summary_file)
        .await
        .context("Failed to load summary")?;
    info!("Loaded {} records from {}", records.len(), summary_file.display());

    let dataset = load_dataset(dataset_file);
    let evaluation = evaluation::evaluate(&records, dataset.as_ref());

    let out_dir = summary_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Report::new(config.model.as_str(), evaluation)
        .write(out_dir)
        .await
        .context("Failed to write report data")?;
    Ok(ExitCode::SUCCESS)
}

async fn models(config: &Arc<Config>) -> Result<ExitCode> {
    let client = build_client(config, RunMetrics::new())?;
    let models = client.list_models().await.context("Failed to list models")?;
    if models.is_empty() {
        warn!("No models installed at {}", config.client.base_url);
    }
    for model in models {
        match model.size {
            Some(size) => println!("{}\t{:.1} GB", model.name, size as f64 / 1e9),
            None => println!("{}", model.name),
        }
    }
    Ok(ExitCode::SUCCESS)
}
