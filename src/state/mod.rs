//! Per-project pointer to the most recent Vibe session.
//!
//! The state file maps a canonical project directory to the last session
//! id resolved there:
//!
//! ```json
//! { "projects": { "/home/me/repo": { "session_id": "…", "updated_at": "…" } } }
//! ```
//!
//! Loading never fails (missing or corrupt → empty).  Saving rewrites the
//! whole file through a temp file + rename.  There is no locking; the last
//! writer wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Canonical map key for a project directory: the resolved real path, or
/// the raw path string when it cannot be resolved.
///
/// Every lookup and every save must go through this function.
pub fn canonical_key(dir: &Path) -> String {
    match std::fs::canonicalize(dir) {
        Ok(real) => real.to_string_lossy().into_owned(),
        Err(_) => dir.to_string_lossy().into_owned(),
    }
}

/// Last known session for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub session_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Whole contents of the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectEntry>,
    /// Unknown top-level keys, carried through saves untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProjectState {
    pub fn session_for(&self, project_dir: &Path) -> Option<&str> {
        self.projects
            .get(&canonical_key(project_dir))
            .map(|e| e.session_id.as_str())
    }

    /// Point `project_dir` at `session_id`, replacing any previous entry.
    pub fn record(&mut self, project_dir: &Path, session_id: impl Into<String>) {
        self.projects.insert(
            canonical_key(project_dir),
            ProjectEntry {
                session_id: session_id.into(),
                updated_at: Utc::now(),
            },
        );
    }
}

/// Persistence for [`ProjectState`].
pub trait ProjectStateStore: Send + Sync {
    /// Fresh copy of the state.  Never fails.
    fn load(&self) -> ProjectState;

    /// Replace the persisted state with `state`.
    fn save(&self, state: &ProjectState) -> anyhow::Result<()>;
}

// ── File store ───────────────────────────────────────────────

/// [`ProjectStateStore`] backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProjectStateStore for FileStateStore {
    fn load(&self) -> ProjectState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "state file unreadable; starting empty");
                }
                return ProjectState::default();
            }
        };
        match parse_state(&raw) {
            Some(state) => state,
            None => {
                warn!(path = %self.path.display(), "state file corrupt; starting empty");
                ProjectState::default()
            }
        }
    }

    fn save(&self, state: &ProjectState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create state dir {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(state).context("serialize project state")?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        std::fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace state file {}", self.path.display()))?;

        debug!(path = %self.path.display(), projects = state.projects.len(), "project state saved");
        Ok(())
    }
}

/// Lenient parse: a non-object document is rejected, a missing or
/// malformed `projects` map becomes empty, and individual malformed
/// entries are dropped.
fn parse_state(raw: &str) -> Option<ProjectState> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let mut obj = match value {
        serde_json::Value::Object(obj) => obj,
        _ => return None,
    };

    let mut projects = BTreeMap::new();
    if let Some(serde_json::Value::Object(map)) = obj.remove("projects") {
        for (key, entry) in map {
            match serde_json::from_value::<ProjectEntry>(entry) {
                Ok(entry) => {
                    projects.insert(key, entry);
                }
                Err(e) => debug!(project = %key, error = %e, "dropping malformed state entry"),
            }
        }
    }

    Some(ProjectState {
        projects,
        extra: obj,
    })
}

// ── In-memory store ──────────────────────────────────────────

/// [`ProjectStateStore`] kept in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<ProjectState>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful [`save`](ProjectStateStore::save) calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProjectStateStore for MemoryStateStore {
    fn load(&self) -> ProjectState {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn save(&self, state: &ProjectState) -> anyhow::Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
