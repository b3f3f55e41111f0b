//! `vibe_run` / `vibe_resume`: one Vibe invocation with session bookkeeping.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use super::{ToolContext, ToolError};
use crate::cost::compute_monthly_cost;
use crate::format::{extract_assistant_text, format_result};
use crate::install::{self, InstallMethod};
use crate::process::{run_command, CommandSpec};
use crate::utils::format_number;

/// Text returned when a resume has nothing to resume.
pub const NO_STORED_SESSION: &str =
    "error: no stored session for this project; run vibe_run first or pass session_id";

/// Whether the call starts fresh or continues a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Run,
    Resume,
}

fn default_max_turns() -> u32 {
    1
}

/// Any non-negative JSON number; fractions are truncated.
fn deserialize_turns<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let turns = f64::deserialize(deserializer)?;
    if !turns.is_finite() || turns < 0.0 {
        return Err(serde::de::Error::custom(
            "max_turns must be a non-negative number",
        ));
    }
    Ok(turns.trunc().min(f64::from(u32::MAX)) as u32)
}

/// Arguments accepted by `vibe_run` and `vibe_resume`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunArgs {
    pub prompt: String,
    #[serde(default)]
    pub project_dir: Option<String>,
    /// Only honoured by `vibe_resume`.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default = "default_max_turns", deserialize_with = "deserialize_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub max_price: f64,
    #[serde(default)]
    pub plan: bool,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub vibe_bin: Option<String>,
    #[serde(default)]
    pub auto_install: Option<bool>,
    #[serde(default)]
    pub auto_update: Option<bool>,
    #[serde(default)]
    pub install_method: Option<String>,
}

impl RunArgs {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            project_dir: None,
            session_id: None,
            stdin: None,
            max_turns: default_max_turns(),
            max_price: 0.0,
            plan: false,
            enabled_tools: Vec::new(),
            agent: None,
            vibe_bin: None,
            auto_install: None,
            auto_update: None,
            install_method: None,
        }
    }
}

/// Command line for a programmatic Vibe run (without `--resume`).
pub fn build_agent_args(args: &RunArgs) -> Vec<String> {
    let mut argv = vec![
        "-p".to_string(),
        args.prompt.clone(),
        "--output".to_string(),
        "json".to_string(),
        "--max-turns".to_string(),
        args.max_turns.to_string(),
        "--max-price".to_string(),
        format_number(args.max_price),
    ];
    if args.plan {
        argv.push("--plan".to_string());
    }
    for tool in &args.enabled_tools {
        argv.push("--enabled-tools".to_string());
        argv.push(tool.clone());
    }
    if let Some(agent) = args.agent.as_deref().filter(|a| !a.is_empty()) {
        argv.push("--agent".to_string());
        argv.push(agent.to_string());
    }
    argv
}

/// Run Vibe once for `args` and return the formatted outcome.
///
/// Flow: load state, assemble arguments, make sure the binary is there,
/// snapshot the session logs, run, resolve the new session, persist it,
/// summarise costs, format.
pub async fn run_vibe(ctx: &ToolContext, mode: RunMode, args: RunArgs) -> Result<String, ToolError> {
    if args.prompt.trim().is_empty() {
        return Err(ToolError::InvalidArguments(
            "prompt is required and must be a non-empty string".into(),
        ));
    }
    let method = match args.install_method.as_deref() {
        Some(raw) => raw
            .parse::<InstallMethod>()
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?,
        None => ctx.config.install_method,
    };

    let project_dir = match args.project_dir.as_deref().filter(|d| !d.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()
            .map_err(|e| ToolError::Internal(anyhow::Error::new(e).context("current directory")))?,
    };
    let mut state = ctx.state.load();

    let mut argv = build_agent_args(&args);
    if mode == RunMode::Resume {
        let stored = state.session_for(&project_dir).map(str::to_string);
        let session = args
            .session_id
            .clone()
            .filter(|s| !s.is_empty())
            .or(stored);
        let Some(session) = session else {
            return Ok(NO_STORED_SESSION.to_string());
        };
        let mut resumed = vec!["--resume".to_string(), session];
        resumed.append(&mut argv);
        argv = resumed;
    }

    let preferred = args.vibe_bin.clone().or_else(|| ctx.config.vibe_bin.clone());
    let binary = match install::ensure_available(
        preferred.as_deref(),
        method,
        args.auto_install.unwrap_or(ctx.config.auto_install),
        args.auto_update.unwrap_or(ctx.config.auto_update),
        &project_dir,
        &ctx.config.env,
    )
    .await
    {
        Ok(path) => path,
        Err(e) => return Ok(format!("error: {e:#}")),
    };

    let start = SystemTime::now();
    let before = ctx.sessions.list_session_files();

    info!(
        binary = %binary.display(),
        project = %project_dir.display(),
        ?mode,
        "running vibe"
    );
    let result = run_command(
        CommandSpec::new(&binary, &project_dir)
            .args(argv)
            .stdin(args.stdin)
            .timeout(ctx.config.timeout)
            .env(ctx.agent_env()),
    )
    .await?;

    match ctx.resolver.resolve(&before, start, &project_dir) {
        Some(session_id) => {
            info!(%session_id, project = %project_dir.display(), "session resolved");
            state.record(&project_dir, session_id);
            if let Err(e) = ctx.state.save(&state) {
                warn!(error = %format!("{e:#}"), "failed to persist project state");
            }
        }
        None => warn!(project = %project_dir.display(), "could not resolve a session for this run"),
    }

    let cost = compute_monthly_cost(ctx.sessions.as_ref(), chrono::Utc::now());
    let extracted = extract_assistant_text(&result.stdout);
    Ok(format_result(&result, &extracted, &cost))
}
