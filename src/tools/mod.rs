//! Tool surface exposed over the protocol.
//!
//! Three tools are published: `vibe_run`, `vibe_resume` and `vibe_manage`.
//! [`list_tools`] returns their metadata; [`call_tool`] dispatches a call.
//! Every normal outcome is a single text block.  Only malformed calls
//! (unknown tool, bad arguments, unknown action) and spawn failures come
//! back as [`ToolError`].

pub mod manage;
pub mod run;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::Config;
use crate::process::RunError;
use crate::session::resolver::{LogDiffResolver, SessionResolver};
use crate::session::{DirSessionLog, SessionLog};
use crate::state::{FileStateStore, ProjectStateStore};

pub use manage::{manage, ManageAction, ManageArgs};
pub use run::{build_agent_args, run_vibe, RunArgs, RunMode};

pub const TOOL_RUN: &str = "vibe_run";
pub const TOOL_RESUME: &str = "vibe_resume";
pub const TOOL_MANAGE: &str = "vibe_manage";

// ── Tool metadata ───────────────────────────────────────────

/// Metadata describing one published tool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolMeta {
    pub name: String,
    pub description: String,
    /// JSON Schema of the `arguments` object.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Properties shared by `vibe_run` and `vibe_resume`.
fn run_properties() -> serde_json::Map<String, Value> {
    let props = json!({
        "prompt": {
            "type": "string",
            "description": "User instruction to pass to Vibe."
        },
        "project_dir": {
            "type": "string",
            "description": "Working directory for the Vibe run (defaults to current)."
        },
        "stdin": {
            "type": "string",
            "description": "Optional stdin content to pipe into Vibe."
        },
        "max_turns": {
            "type": "number",
            "description": "Maximum number of assistant turns (programmatic mode); fractions are truncated. Default: 1."
        },
        "max_price": {
            "type": "number",
            "description": "Maximum cost in dollars (programmatic mode). Default: 0."
        },
        "plan": {
            "type": "boolean",
            "description": "Enable plan mode (read-only tools)."
        },
        "enabled_tools": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Restrict enabled tools in programmatic mode (glob/regex supported)."
        },
        "agent": {
            "type": "string",
            "description": "Agent configuration name from ~/.vibe/agents/NAME.toml."
        },
        "vibe_bin": {
            "type": "string",
            "description": "Override Vibe binary path (default: VIBE_BIN, then vibe, then mistral-vibe)."
        },
        "auto_install": {
            "type": "boolean",
            "description": "Install Vibe with uv when it cannot be found."
        },
        "auto_update": {
            "type": "boolean",
            "description": "Re-run the installer before this run to pick up a newer Vibe."
        },
        "install_method": {
            "type": "string",
            "enum": ["auto", "uv"],
            "description": "Installer used by auto_install / auto_update. Default: auto."
        }
    });
    match props {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Metadata for every published tool, in a stable order.
pub fn list_tools() -> Vec<ToolMeta> {
    let run_schema = json!({
        "type": "object",
        "properties": run_properties(),
        "required": ["prompt"]
    });

    let mut resume_props = run_properties();
    resume_props.insert(
        "session_id".into(),
        json!({
            "type": "string",
            "description": "Override session ID to resume."
        }),
    );
    let resume_schema = json!({
        "type": "object",
        "properties": resume_props,
        "required": ["prompt"]
    });

    vec![
        ToolMeta {
            name: TOOL_RUN.into(),
            description: "Run Vibe CLI in programmatic mode and store the session ID per project."
                .into(),
            input_schema: run_schema,
        },
        ToolMeta {
            name: TOOL_RESUME.into(),
            description: "Resume a project session using the last stored Vibe session ID.".into(),
            input_schema: resume_schema,
        },
        ToolMeta {
            name: TOOL_MANAGE.into(),
            description: "Check, install or update the Vibe CLI binary.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["status", "install", "update"],
                        "description": "status reports the resolved binary and costs; install/update run the installer."
                    },
                    "install_method": {
                        "type": "string",
                        "enum": ["auto", "uv"],
                        "description": "Installer to use. Default: auto."
                    },
                    "vibe_bin": {
                        "type": "string",
                        "description": "Override Vibe binary path."
                    }
                },
                "required": ["action"]
            }),
        },
    ]
}

// ── Errors ───────────────────────────────────────────────────

/// Failures surfaced as protocol errors instead of text.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    InvalidArguments(String),
    #[error("unknown action '{0}' (expected status, install or update)")]
    UnknownAction(String),
    #[error(transparent)]
    Spawn(#[from] RunError),
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl ToolError {
    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            ToolError::UnknownTool(_)
            | ToolError::InvalidArguments(_)
            | ToolError::UnknownAction(_) => -32602,
            ToolError::Spawn(_) | ToolError::Internal(_) => -32603,
        }
    }
}

// ── Context ──────────────────────────────────────────────────

/// Handles every tool call needs: settings plus the two on-disk stores.
///
/// Stores are trait objects so tests can swap in fakes.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Config,
    pub state: Arc<dyn ProjectStateStore>,
    pub sessions: Arc<dyn SessionLog>,
    pub resolver: Arc<dyn SessionResolver>,
}

impl ToolContext {
    pub fn new(
        config: Config,
        state: Arc<dyn ProjectStateStore>,
        sessions: Arc<dyn SessionLog>,
    ) -> Self {
        let resolver = Arc::new(LogDiffResolver::new(sessions.clone()));
        Self {
            config,
            state,
            sessions,
            resolver,
        }
    }

    /// File-backed stores at the configured locations.
    pub fn from_config(config: Config) -> Self {
        let state = Arc::new(FileStateStore::new(config.state_path.clone()));
        let sessions = Arc::new(DirSessionLog::new(config.session_dir.clone()));
        Self::new(config, state, sessions)
    }

    /// Environment for Vibe itself: inherited vars, augmented PATH and
    /// colour output switched off.
    pub fn agent_env(&self) -> HashMap<String, String> {
        let mut env = crate::install::with_augmented_path(&self.config.env);
        env.insert("NO_COLOR".into(), "1".into());
        env.insert("FORCE_COLOR".into(), "0".into());
        env.insert("TERM".into(), "dumb".into());
        env
    }
}

/// Dispatch one `tools/call`.
pub async fn call_tool(ctx: &ToolContext, name: &str, arguments: Value) -> Result<String, ToolError> {
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other,
    };
    match name {
        TOOL_RUN | TOOL_RESUME => {
            let mode = if name == TOOL_RUN {
                RunMode::Run
            } else {
                RunMode::Resume
            };
            let args: RunArgs = parse_args(arguments)?;
            run_vibe(ctx, mode, args).await
        }
        TOOL_MANAGE => {
            let args: ManageArgs = parse_args(arguments)?;
            manage(ctx, args).await
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("Invalid arguments: {e}")))
}
