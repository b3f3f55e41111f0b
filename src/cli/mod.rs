//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the logic lives here.

use tracing::info;

use crate::config::Config;
use crate::cost::compute_monthly_cost;
use crate::format::format_cost_line;
use crate::install::InstallMethod;
use crate::server;
use crate::tools::{self, ManageAction, ManageArgs, ToolContext};

// ── Serve ────────────────────────────────────────────────────────────────────

/// Run the MCP server on stdin/stdout until the client disconnects.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        state = %config.state_path.display(),
        sessions = %config.session_dir.display(),
        "vibe-mcp serving on stdio"
    );
    server::run_stdio(ToolContext::from_config(config)).await
}

// ── Binary management ────────────────────────────────────────────────────────

/// Print the resolved binary, store locations and this month's spend.
pub async fn status(config: Config) -> anyhow::Result<()> {
    let ctx = ToolContext::from_config(config);
    let text = tools::manage(&ctx, ManageArgs::new(ManageAction::Status)).await?;
    println!("{text}");
    Ok(())
}

/// Install (or update) Vibe; a failed installer is a non-zero exit.
pub async fn install(
    config: Config,
    action: ManageAction,
    method: Option<InstallMethod>,
) -> anyhow::Result<()> {
    let ctx = ToolContext::from_config(config);
    let mut args = ManageArgs::new(action);
    args.install_method = method.map(|m| m.to_string());

    let text = tools::manage(&ctx, args).await?;
    if let Some(reason) = text.strip_prefix("error: ") {
        anyhow::bail!("{reason}");
    }
    println!("{text}");
    Ok(())
}

// ── Cost ─────────────────────────────────────────────────────────────────────

pub fn cost(config: Config) -> anyhow::Result<()> {
    let ctx = ToolContext::from_config(config);
    let summary = compute_monthly_cost(ctx.sessions.as_ref(), chrono::Utc::now());
    println!("{}", format_cost_line(&summary));
    Ok(())
}
