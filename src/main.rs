mod cli;
mod server;
mod tools;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pairstore::config::PairstoreConfig;

#[derive(Parser)]
#[command(
    name = "pairstore",
    version,
    about = "Schema-driven append-only record store with vector recall"
)]
struct Cli {
    /// Config file (defaults to ~/.pairstore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server
    Serve {
        /// Transport to serve on: stdio or http (overrides server.transport)
        #[arg(long)]
        transport: Option<String>,
    },
    /// Reconcile the agent's tables with its schema files
    Migrate {
        /// Print the plan without applying it
        #[arg(long)]
        dry_run: bool,
    },
    /// List records matching field filters
    Find {
        /// Input filter as a JSON object, e.g. '{"topic": "math"}'
        #[arg(long)]
        input: Option<String>,
        /// Output filter as a JSON object
        #[arg(long)]
        output: Option<String>,
        /// Include superseded records
        #[arg(long)]
        history: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one record with its edit chain and audit log
    Inspect { id: i64 },
    /// Show record counts for the agent
    Stats,
    /// Embed every active record that has no vector
    Reindex,
    /// Drop the agent and all of its data
    Erase,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PairstoreConfig::load_from(path)?,
        None => PairstoreConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            let transport = transport.unwrap_or_else(|| config.server.transport.clone());
            match transport.as_str() {
                "stdio" => server::serve_stdio(config).await?,
                "http" => server::serve_http(config).await?,
                other => bail!("unknown transport '{other}' (expected stdio or http)"),
            }
        }
        Command::Migrate { dry_run } => cli::migrate::migrate(&config, dry_run)?,
        Command::Find {
            input,
            output,
            history,
            limit,
        } => cli::find::find(
            &config,
            input.as_deref(),
            output.as_deref(),
            history,
            limit,
        )?,
        Command::Inspect { id } => cli::inspect::inspect(&config, id)?,
        Command::Stats => cli::stats::stats(&config)?,
        Command::Reindex => cli::reindex::reindex(config).await?,
        Command::Erase => cli::erase::erase(&config)?,
    }

    Ok(())
}
