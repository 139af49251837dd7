use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::prompts::PromptSource;

#[derive(Debug, Parser)]
#[command(name = "command-intent", version, about = "Classify dialogue snippets with a local Ollama model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level for this crate (RUST_LOG still applies on top)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(flatten)]
    pub overrides: Overrides,
}

/// Command-line values that take precedence over the environment.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Ollama base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,
    #[arg(long, global = true)]
    pub model: Option<String>,
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    pub temperature: Option<f64>,
    #[arg(long, global = true)]
    pub top_p: Option<f64>,
    /// Positive values trade false positives for false negatives
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub precision_bias: Option<f64>,
    /// Total attempts per request
    #[arg(long, global = true)]
    pub retries: Option<u32>,
    /// Pause between remote calls, in milliseconds
    #[arg(long, global = true)]
    pub delay_ms: Option<u64>,
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Classify a prompt list, checkpointing every result, then score it
    Run(RunArgs),
    /// Check that the model answers
    Probe,
    /// Send a single prompt
    Ask {
        prompt: String,
        /// Print text increments as they arrive
        #[arg(long, conflicts_with = "blocking")]
        stream: bool,
        /// Use the synchronous client
        #[arg(long)]
        blocking: bool,
        #[arg(long)]
        system_prompt_file: Option<PathBuf>,
    },
    /// Re-score an existing summary without calling the model
    Evaluate {
        #[arg(long)]
        summary_file: PathBuf,
        #[arg(long)]
        dataset_file: Option<PathBuf>,
    },
    /// List models installed on the endpoint
    Models,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Text file, one prompt per line
    #[arg(long, group = "source")]
    pub prompts_file: Option<PathBuf>,
    /// JSON prompt list or dialogue dataset
    #[arg(long, group = "source")]
    pub json_file: Option<PathBuf>,
    /// Folder of JSON prompt files
    #[arg(long, group = "source")]
    pub inputs_dir: Option<PathBuf>,
    #[arg(long)]
    pub system_prompt_file: Option<PathBuf>,
    /// Reference labels for scoring
    #[arg(long)]
    pub dataset_file: Option<PathBuf>,
    /// Ignore previous results and call the model for every prompt
    #[arg(long)]
    pub no_resume: bool,
    /// Also keep the untouched remote reply under raw/
    #[arg(long)]
    pub save_raw: bool,
    #[arg(long)]
    pub no_report: bool,
}

impl RunArgs {
    pub fn prompt_source(&self) -> PromptSource {
        if let Some(ref p) = self.prompts_file {
            PromptSource::TextFile(p.clone())
        } else if let Some(ref p) = self.json_file {
            PromptSource::JsonFile(p.clone())
        } else if let Some(ref p) = self.inputs_dir {
            PromptSource::InputsDir(p.clone())
        } else {
            PromptSource::Defaults
        }
    }
}

impl Cli {
    /// Fold command-line values into the environment-derived config. Called
    /// once, before the config is shared.
    pub fn apply(&self, config: &mut Config) {
        let o = &self.overrides;
        if let Some(ref url) = o.api_url {
            config.client.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ref model) = o.model {
            config.model = model.clone();
        }
        if let Some(ref dir) = o.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(t) = o.temperature {
            config.decoding.temperature = t;
        }
        if let Some(p) = o.top_p {
            config.decoding.top_p = p;
        }
        if let Some(b) = o.precision_bias {
            config.decoding.precision_bias = b;
        }
        if let Some(r) = o.retries {
            config.client.retry.attempts = r.max(1);
        }
        if let Some(ms) = o.delay_ms {
            config.delay = Duration::from_millis(ms);
        }
        if let Some(secs) = o.timeout_secs {
            config.client.timeout = Duration::from_secs(secs);
        }
        if let Commands::Run(ref args) = self.command {
            if args.no_resume {
                config.resume = false;
            }
            if args.save_raw {
                config.save_raw = true;
            }
        }
    }
}
