use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::install::InstallMethod;

/// Environment variable overriding the state file location.
pub const STATE_ENV_VAR: &str = "VIBE_MCP_STATE";
/// Environment variable overriding the session log directory.
pub const SESSION_DIR_ENV_VAR: &str = "VIBE_MCP_SESSION_DIR";
/// Environment variable overriding the run timeout (seconds).
pub const TIMEOUT_ENV_VAR: &str = "VIBE_MCP_TIMEOUT_SECS";
/// Vibe's own home directory override.
pub const VIBE_HOME_ENV_VAR: &str = "VIBE_HOME";

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// On-disk configuration (`config.yaml`).  Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Binary name or path used when a call does not pass `vibe_bin`.
    #[serde(default)]
    pub vibe_bin: Option<String>,
    /// Location of the project state file.
    #[serde(default)]
    pub state_path: Option<String>,
    /// Directory Vibe writes its session logs to.
    #[serde(default)]
    pub session_dir: Option<String>,
    /// Wall-clock limit for one Vibe run.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub install_method: Option<InstallMethod>,
    /// Install Vibe on demand when it cannot be found.
    #[serde(default)]
    pub auto_install: Option<bool>,
    /// Refresh Vibe before every run.
    #[serde(default)]
    pub auto_update: Option<bool>,
}

/// Effective settings after merging the file, environment and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub vibe_bin: Option<String>,
    pub state_path: PathBuf,
    pub session_dir: PathBuf,
    pub timeout: Duration,
    pub install_method: InstallMethod,
    pub auto_install: bool,
    pub auto_update: bool,
    /// Environment handed to child processes (before per-run overrides).
    pub env: HashMap<String, String>,
}

impl Config {
    /// `~/.config/vibe-mcp/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".config").join("vibe-mcp").join("config.yaml"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist.  Without one the default location is
    /// used when present and silently skipped otherwise.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let file = match path {
            Some(p) => Some(read_file_config(p).await?),
            None => match Self::default_path() {
                Some(p) if tokio::fs::try_exists(&p).await.unwrap_or(false) => {
                    Some(read_file_config(&p).await?)
                }
                _ => None,
            },
        };

        let config = Self::from_parts(file.unwrap_or_default(), crate::process::inherited_env())?;

        tracing::debug!(
            state = %config.state_path.display(),
            sessions = %config.session_dir.display(),
            timeout_secs = config.timeout.as_secs(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Merge a parsed file with an environment map.  Environment wins.
    pub fn from_parts(file: FileConfig, env: HashMap<String, String>) -> anyhow::Result<Config> {
        let home = env
            .get("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        let state_path = non_empty(&env, STATE_ENV_VAR)
            .map(PathBuf::from)
            .or_else(|| file.state_path.as_deref().map(|p| expand_home(p, &home)))
            .unwrap_or_else(|| {
                home.join(".local/share/mcp-servers/vibe-mcp")
                    .join("state.json")
            });

        let session_dir = non_empty(&env, SESSION_DIR_ENV_VAR)
            .map(PathBuf::from)
            .or_else(|| file.session_dir.as_deref().map(|p| expand_home(p, &home)))
            .or_else(|| {
                non_empty(&env, VIBE_HOME_ENV_VAR).map(|h| PathBuf::from(h).join("logs/session"))
            })
            .unwrap_or_else(|| home.join(".vibe/logs/session"));

        let timeout_secs = match non_empty(&env, TIMEOUT_ENV_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{TIMEOUT_ENV_VAR} must be a whole number of seconds"))?,
            None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            anyhow::bail!("config: timeout_secs=0 would kill every run immediately");
        }

        Ok(Config {
            vibe_bin: file.vibe_bin.filter(|b| !b.trim().is_empty()),
            state_path,
            session_dir,
            timeout: Duration::from_secs(timeout_secs),
            install_method: file.install_method.unwrap_or_default(),
            auto_install: file.auto_install.unwrap_or(false),
            auto_update: file.auto_update.unwrap_or(false),
            env,
        })
    }
}

async fn read_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config YAML: {}", path.display()))
}

fn non_empty<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
}

fn expand_home(raw: &str, home: &Path) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if raw == "~" => home.to_path_buf(),
        None => PathBuf::from(raw),
    }
}
