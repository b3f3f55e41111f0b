use vibe_mcp::cli;
use vibe_mcp::config::Config;
use vibe_mcp::install::InstallMethod;
use vibe_mcp::tools::ManageAction;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vibe-mcp", version, about = "MCP server for the Vibe CLI")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP over stdin/stdout (default)
    Serve,
    /// Show the resolved Vibe binary, state and session locations
    Status,
    /// Install the Vibe CLI
    Install {
        /// Installer to use (auto, uv)
        #[arg(long)]
        method: Option<InstallMethod>,
    },
    /// Update the Vibe CLI
    Update {
        /// Installer to use (auto, uv)
        #[arg(long)]
        method: Option<InstallMethod>,
    },
    /// Print this month's Vibe spend
    Cost,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries protocol frames; logs go to stderr.
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => cli::serve(config).await,
        Command::Status => cli::status(config).await,
        Command::Install { method } => cli::install(config, ManageAction::Install, method).await,
        Command::Update { method } => cli::install(config, ManageAction::Update, method).await,
        Command::Cost => cli::cost(config),
    }
}
