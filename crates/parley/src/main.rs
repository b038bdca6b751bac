//! Parley chat service - JSON HTTP front end for the reply pipeline

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use parley::config::Config;
use parley::error::Result;
use parley::orchestrator::Orchestrator;
use parley::server::ChatServer;

/// Parley - chat replies from OpenAI or Perplexity, with optional web search
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat service answering with OpenAI or Perplexity, with optional web search")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Override the listen address (e.g. 0.0.0.0:8000)
    #[arg(long, global = true)]
    pub listen: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the chat server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }

    parley::logging::init(&config.logging, parley::logging::DEFAULT_DIRECTIVE)?;

    match cli.command {
        None | Some(Command::Serve) => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting Parley chat service");
    tracing::debug!("Config loaded: {:?}", config.server);

    if config.backend.base_url.is_some() {
        tracing::warn!("backend.base_url is ignored by the chat service");
    }

    let server_config = config.server.clone();
    let orchestrator = Orchestrator::from_config(config)?;

    let server = ChatServer::new(orchestrator, server_config);
    server.serve().await?;

    tracing::info!("Parley chat service stopped");
    Ok(())
}
