//! Locating, installing and updating the Vibe CLI.
//!
//! Lookup never executes a candidate: names are resolved with the shell's
//! `command -v` builtin against a PATH that puts the user-local and
//! user-toolchain bin directories first and drops empty or relative
//! entries.  Installation only ever runs the strategies listed in
//! [`InstallMethod::strategies`], each one logged before it starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::process::{run_command, CommandSpec, InvocationResult};
use crate::utils::truncate_str;

/// Default executable name of the external agent.
pub const DEFAULT_BINARY: &str = "vibe";
/// Secondary name some installs expose.
pub const ALIAS_BINARY: &str = "mistral-vibe";
/// Environment variable that overrides the binary location.
pub const BIN_ENV_VAR: &str = "VIBE_BIN";
/// Package that provides the agent.
pub const PACKAGE: &str = "mistral-vibe";

const UV_BOOTSTRAP: &str = "curl -LsSf https://astral.sh/uv/install.sh | sh";
const SHELL: &str = "/bin/sh";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

// ── Install method ───────────────────────────────────────────

/// How the agent gets installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    /// Try every known strategy in priority order.
    #[default]
    Auto,
    /// `uv tool install`, bootstrapping uv if needed.
    Uv,
}

impl InstallMethod {
    /// Ordered strategy chain.  First success wins.
    pub fn strategies(self) -> Vec<InstallStrategy> {
        match self {
            InstallMethod::Auto => vec![InstallStrategy::Uv],
            InstallMethod::Uv => vec![InstallStrategy::Uv],
        }
    }
}

impl FromStr for InstallMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(InstallMethod::Auto),
            "uv" => Ok(InstallMethod::Uv),
            other => anyhow::bail!("unknown install method '{other}' (expected auto or uv)"),
        }
    }
}

impl std::fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallMethod::Auto => f.write_str("auto"),
            InstallMethod::Uv => f.write_str("uv"),
        }
    }
}

/// A single concrete way of installing the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStrategy {
    Uv,
}

impl InstallStrategy {
    pub fn name(self) -> &'static str {
        match self {
            InstallStrategy::Uv => "uv",
        }
    }

    async fn attempt(self, cwd: &Path, env: &HashMap<String, String>) -> anyhow::Result<String> {
        match self {
            InstallStrategy::Uv => install_with_uv(cwd, env).await,
        }
    }
}

/// Which strategy succeeded and what it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub strategy: &'static str,
    pub summary: String,
}

// ── PATH handling ────────────────────────────────────────────

fn home_from(env: &HashMap<String, String>) -> Option<PathBuf> {
    env.get("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
}

/// Build the lookup PATH: `~/.local/bin` and `~/.cargo/bin` first, then the
/// inherited PATH minus empty, relative and duplicate entries.
pub fn augmented_path(env: &HashMap<String, String>) -> String {
    let mut entries: Vec<String> = Vec::new();
    if let Some(home) = home_from(env) {
        entries.push(home.join(".local").join("bin").to_string_lossy().into_owned());
        entries.push(home.join(".cargo").join("bin").to_string_lossy().into_owned());
    }
    let inherited = env.get("PATH").map(String::as_str).unwrap_or_default();
    for entry in inherited.split(':') {
        if entry.is_empty() || !Path::new(entry).is_absolute() {
            continue;
        }
        if !entries.iter().any(|d| d == entry) {
            entries.push(entry.to_string());
        }
    }
    entries.join(":")
}

/// Copy of `env` with PATH replaced by [`augmented_path`].
pub fn with_augmented_path(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut out = env.clone();
    out.insert("PATH".to_string(), augmented_path(env));
    out
}

// ── Resolution ───────────────────────────────────────────────

/// Names to try, highest priority first: explicit value, `VIBE_BIN`, the
/// default name, then the alias.  Blank and repeated entries are skipped.
pub fn candidates(preferred: Option<&str>, env: &HashMap<String, String>) -> Vec<String> {
    let ordered = [
        preferred.map(str::to_string),
        env.get(BIN_ENV_VAR).cloned(),
        Some(DEFAULT_BINARY.to_string()),
        Some(ALIAS_BINARY.to_string()),
    ];
    let mut out: Vec<String> = Vec::new();
    for name in ordered.into_iter().flatten() {
        let name = name.trim().to_string();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Resolve one name or path.
///
/// Values containing a path separator are used verbatim if they exist.
/// Bare names go through `command -v` on the augmented PATH.
pub async fn lookup(name: &str, env: &HashMap<String, String>) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        let path = PathBuf::from(name);
        return path.exists().then_some(path);
    }

    let spec = CommandSpec::new(SHELL, std::env::temp_dir())
        .args(["-c", "command -v \"$1\"", "vibe-mcp-lookup", name])
        .env(with_augmented_path(env))
        .timeout(LOOKUP_TIMEOUT);

    match run_command(spec).await {
        Ok(result) if result.success() => {
            let found = result.stdout.lines().next().unwrap_or_default().trim();
            // Builtins, aliases and functions print bare names.
            if Path::new(found).is_absolute() {
                debug!(name, path = found, "binary resolved");
                Some(PathBuf::from(found))
            } else {
                None
            }
        }
        Ok(_) => None,
        Err(e) => {
            warn!(name, error = %e, "command -v lookup failed");
            None
        }
    }
}

/// Walk the [`candidates`] chain and return the first hit.
pub async fn resolve(preferred: Option<&str>, env: &HashMap<String, String>) -> Option<PathBuf> {
    for name in candidates(preferred, env) {
        if let Some(path) = lookup(&name, env).await {
            return Some(path);
        }
    }
    None
}

// ── Install / update ─────────────────────────────────────────

/// Run the strategy chain for `method`, stopping at the first success.
///
/// When every strategy fails the error lists each one's diagnostic.
pub async fn install(
    method: InstallMethod,
    cwd: &Path,
    env: &HashMap<String, String>,
) -> anyhow::Result<InstallReport> {
    let mut failures: Vec<String> = Vec::new();
    for strategy in method.strategies() {
        info!(strategy = strategy.name(), %method, "attempting install");
        match strategy.attempt(cwd, env).await {
            Ok(summary) => {
                info!(strategy = strategy.name(), %summary, "install succeeded");
                return Ok(InstallReport {
                    strategy: strategy.name(),
                    summary,
                });
            }
            Err(e) => {
                warn!(strategy = strategy.name(), error = %format!("{e:#}"), "install strategy failed");
                failures.push(format!("[{}] {e:#}", strategy.name()));
            }
        }
    }
    anyhow::bail!(
        "all install strategies failed (method {method}):\n{}",
        failures.join("\n")
    )
}

/// Update the agent.
///
/// The Vibe CLI has no self-update command, so this is simply a second
/// [`install`] run; the uv strategy falls through to `uv tool upgrade`
/// whenever `uv tool install` does not succeed.
pub async fn update(
    method: InstallMethod,
    cwd: &Path,
    env: &HashMap<String, String>,
) -> anyhow::Result<InstallReport> {
    install(method, cwd, env).await
}

/// Resolve the binary, optionally refreshing or installing it first.
///
/// Update runs before install-on-demand so a stale binary is refreshed
/// when both flags are set.  Fails with manual install steps when nothing
/// resolves in the end.
pub async fn ensure_available(
    preferred: Option<&str>,
    method: InstallMethod,
    allow_install: bool,
    allow_update: bool,
    cwd: &Path,
    env: &HashMap<String, String>,
) -> anyhow::Result<PathBuf> {
    let mut found = resolve(preferred, env).await;
    let mut install_error: Option<anyhow::Error> = None;

    if allow_update {
        if let Err(e) = update(method, cwd, env).await {
            warn!(error = %format!("{e:#}"), "update failed; continuing with current binary");
            install_error = Some(e);
        }
        found = resolve(preferred, env).await;
    }

    if found.is_none() && allow_install {
        match install(method, cwd, env).await {
            Ok(_) => install_error = None,
            Err(e) => install_error = Some(e),
        }
        found = resolve(preferred, env).await;
    }

    match found {
        Some(path) => Ok(path),
        None => Err(anyhow::anyhow!(
            "{}",
            remediation(preferred, env, install_error.as_ref())
        )),
    }
}

/// Human-readable manual install instructions.
pub fn remediation(
    preferred: Option<&str>,
    env: &HashMap<String, String>,
    install_error: Option<&anyhow::Error>,
) -> String {
    let mut msg = format!(
        "Vibe CLI not found (looked for: {}).\n\
         Install it manually:\n  \
         1. {UV_BOOTSTRAP}\n  \
         2. uv tool install {PACKAGE}\n  \
         3. make sure ~/.local/bin is on PATH, or set {BIN_ENV_VAR} / pass vibe_bin\n\
         Or retry with auto_install=true.",
        candidates(preferred, env).join(", ")
    );
    if let Some(e) = install_error {
        msg.push_str(&format!("\nAutomatic install failed: {e:#}"));
    }
    msg
}

async fn install_with_uv(cwd: &Path, env: &HashMap<String, String>) -> anyhow::Result<String> {
    let child_env = with_augmented_path(env);

    let uv = match lookup("uv", env).await {
        Some(uv) => uv,
        None => {
            info!("uv not found; running bootstrap script");
            let result = run_command(
                CommandSpec::new(SHELL, cwd)
                    .args(["-c", UV_BOOTSTRAP])
                    .env(child_env.clone())
                    .timeout(INSTALL_TIMEOUT),
            )
            .await
            .context("uv bootstrap")?;
            if !result.success() {
                anyhow::bail!("uv bootstrap failed: {}", describe(&result));
            }
            lookup("uv", env)
                .await
                .context("uv bootstrap reported success but uv is still not on PATH")?
        }
    };

    let mut failures: Vec<String> = Vec::new();
    for verb in ["install", "upgrade"] {
        let result = run_command(
            CommandSpec::new(&uv, cwd)
                .args(["tool", verb, PACKAGE])
                .env(child_env.clone())
                .timeout(INSTALL_TIMEOUT),
        )
        .await
        .with_context(|| format!("uv tool {verb}"))?;
        if result.success() {
            return Ok(format!("uv tool {verb} {PACKAGE} succeeded"));
        }
        failures.push(format!("uv tool {verb} {PACKAGE}: {}", describe(&result)));
    }
    anyhow::bail!("{}", failures.join("; "))
}

/// One-line summary of a failed command.
fn describe(result: &InvocationResult) -> String {
    let status = if result.timed_out {
        "timed out".to_string()
    } else {
        match result.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    };
    let stderr = result.stderr.trim();
    let detail = if stderr.is_empty() {
        result.stdout.trim()
    } else {
        stderr
    };
    if detail.is_empty() {
        status
    } else {
        format!("{status}: {}", truncate_str(detail, 400))
    }
}
