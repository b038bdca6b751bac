use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley::config::Config;
use parley::orchestrator::Orchestrator;
use parley_cli::commands::{AskCommand, ChatCommand, ConfigCommand};
use parley_cli::error::CliResult;
use parley_cli::output::OutputFormat;

/// Log filter for the terminal client; replies own stdout
const CLI_LOG_DIRECTIVE: &str = "warn";

#[derive(Parser)]
#[command(name = "parley-cli")]
#[command(about = "Parley CLI - Ask OpenAI or Perplexity from the terminal")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Ask a single question")]
    Ask(AskCommand),

    #[clap(about = "Start an interactive conversation")]
    Chat(ChatCommand),

    #[clap(about = "Configuration commands")]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let config = Config::load(cli.config.as_deref())?;
    parley::logging::init(&config.logging, CLI_LOG_DIRECTIVE)?;

    match &cli.command {
        Command::Config(cmd) => cmd.execute(&config, format).await,
        Command::Ask(cmd) => {
            let orchestrator = Orchestrator::from_config(config)?;
            cmd.execute(&orchestrator, format).await
        }
        Command::Chat(cmd) => {
            let orchestrator = Orchestrator::from_config(config)?;
            cmd.execute(&orchestrator, format).await
        }
    }
}
