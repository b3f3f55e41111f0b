//! `vibe_manage`: status, install and update of the Vibe binary.

use std::str::FromStr;

use serde::Deserialize;

use super::{ToolContext, ToolError};
use crate::cost::compute_monthly_cost;
use crate::format::format_cost_line;
use crate::install::{self, InstallMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageAction {
    Status,
    Install,
    Update,
}

impl FromStr for ManageAction {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(ManageAction::Status),
            "install" => Ok(ManageAction::Install),
            "update" => Ok(ManageAction::Update),
            other => Err(ToolError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManageArgs {
    pub action: String,
    #[serde(default)]
    pub install_method: Option<String>,
    #[serde(default)]
    pub vibe_bin: Option<String>,
}

impl ManageArgs {
    pub fn new(action: ManageAction) -> Self {
        let action = match action {
            ManageAction::Status => "status",
            ManageAction::Install => "install",
            ManageAction::Update => "update",
        };
        Self {
            action: action.to_string(),
            install_method: None,
            vibe_bin: None,
        }
    }
}

pub async fn manage(ctx: &ToolContext, args: ManageArgs) -> Result<String, ToolError> {
    let action: ManageAction = args.action.parse()?;
    let method = match args.install_method.as_deref() {
        Some(raw) => raw
            .parse::<InstallMethod>()
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?,
        None => ctx.config.install_method,
    };
    let preferred = args.vibe_bin.or_else(|| ctx.config.vibe_bin.clone());
    let env = &ctx.config.env;
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir());

    let outcome = match action {
        ManageAction::Status => return Ok(status(ctx, preferred.as_deref()).await),
        ManageAction::Install => install::install(method, &cwd, env).await,
        ManageAction::Update => install::update(method, &cwd, env).await,
    };

    let verb = if action == ManageAction::Install {
        "installed"
    } else {
        "updated"
    };
    let text = match outcome {
        Ok(report) => {
            let location = match install::resolve(preferred.as_deref(), env).await {
                Some(path) => format!("Vibe binary: {}", path.display()),
                None => format!(
                    "warning: installer succeeded but Vibe is still not on PATH\n{}",
                    install::remediation(preferred.as_deref(), env, None)
                ),
            };
            format!(
                "ok: {verb} Vibe via {} ({})\n{location}",
                report.strategy, report.summary
            )
        }
        Err(e) => format!("error: {e:#}"),
    };
    Ok(text)
}

async fn status(ctx: &ToolContext, preferred: Option<&str>) -> String {
    let env = &ctx.config.env;
    let binary = match install::resolve(preferred, env).await {
        Some(path) => format!("Vibe binary: {}", path.display()),
        None => format!(
            "Vibe binary: not found\n{}",
            install::remediation(preferred, env, None)
        ),
    };
    let log_count = ctx.sessions.list_session_files().len();
    let projects = ctx.state.load().projects.len();
    let cost = compute_monthly_cost(ctx.sessions.as_ref(), chrono::Utc::now());

    [
        binary,
        format!(
            "State file: {} ({projects} project(s))",
            ctx.config.state_path.display()
        ),
        format!(
            "Session logs: {} ({log_count} file(s))",
            ctx.config.session_dir.display()
        ),
        format_cost_line(&cost),
    ]
    .join("\n")
}
