//! context-budget CLI entry point.

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use context_budget::config::{Config, LoggingConfig};
use context_budget::context::{TokenEstimator, ToolSchemaPayload, TranscriptBudgeter, Turn};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fit LLM transcripts into a context budget
#[derive(Parser)]
#[command(name = "context-budget")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "CONTEXT_BUDGET_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a transcript and print the result as JSON
    Fit {
        #[command(flatten)]
        input: InputArgs,

        /// Total units available for the request
        #[arg(long)]
        max_capacity: Option<usize>,

        /// Units reserved for the model's response
        #[arg(long)]
        response_reserve: Option<usize>,

        /// Print the stage reached and sizes along with the turns
        #[arg(long)]
        report: bool,
    },

    /// Print size estimates without fitting
    Estimate {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args)]
struct InputArgs {
    /// JSON array of turns
    #[arg(short, long)]
    transcript: PathBuf,

    /// JSON tool definitions sent with the request
    #[arg(long)]
    tools: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env()?,
    };

    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Fit {
            input,
            max_capacity,
            response_reserve,
            report,
        } => {
            if let Some(max) = max_capacity {
                config.budget.max_capacity = max;
            }
            if let Some(reserve) = response_reserve {
                config.budget.response_reserve = reserve;
            }
            if let Err(e) = config.validate() {
                warn!("Configuration is degenerate, fitting best-effort: {}", e);
            }

            let budgeter = TranscriptBudgeter::from_config(&config)?;
            let (turns, tools) = input.load()?;
            let outcome = budgeter.fit_with_report(&turns, &config.budget, tools.as_ref());

            debug!(
                "Fitted {} turns to {} ({:?}): {} -> {} units",
                turns.len(),
                outcome.turns.len(),
                outcome.stage,
                outcome.units_before,
                outcome.units_after
            );

            let output = if report {
                serde_json::to_string_pretty(&outcome)?
            } else {
                serde_json::to_string_pretty(&outcome.turns)?
            };
            println!("{}", output);
        }
        Commands::Estimate { input } => {
            let budgeter = TranscriptBudgeter::from_config(&config)?;
            let (turns, tools) = input.load()?;
            let estimator = budgeter.estimator();

            let transcript_units = estimator.estimate_transcript(&turns);
            let tool_schema_units = estimator.estimate_tool_schema(tools.as_ref());
            let summary = json!({
                "turns": turns.len(),
                "transcript_units": transcript_units,
                "tool_schema_units": tool_schema_units,
                "total_units": transcript_units + tool_schema_units,
                "available": config.budget.available(tool_schema_units),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

impl InputArgs {
    fn load(&self) -> anyhow::Result<(Vec<Turn>, Option<ToolSchemaPayload>)> {
        let turns: Vec<Turn> = read_json(&self.transcript)?;
        let tools = match &self.tools {
            Some(path) => Some(read_json(path)?),
            None => None,
        };
        Ok((turns, tools))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Logs go to stderr so stdout stays machine-readable
fn init_logging(verbose: u8, logging: &LoggingConfig) {
    let default_filter = match verbose {
        0 => format!("context_budget={}", logging.level),
        1 => "context_budget=debug".to_string(),
        _ => "context_budget=trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
