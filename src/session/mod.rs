//! Read-only access to the session logs Vibe writes.
//!
//! Vibe drops one JSON document per session into a single directory
//! (`~/.vibe/logs/session` by default).  This module lists those files and
//! parses the handful of metadata fields the adapter needs.  Nothing here
//! ever writes to the directory.

pub mod resolver;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Extension of session log files.
pub const LOG_EXTENSION: &str = ".json";

// ── Entry types ──────────────────────────────────────────────

/// The metadata fields of one session log that the adapter consumes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionLogEntry {
    /// `metadata.session_id`, only when it is a string.
    pub session_id: Option<String>,
    /// `metadata.start_time`, when present and parseable.
    pub start_time: Option<DateTime<Utc>>,
    /// `metadata.environment.working_directory`.
    pub working_directory: Option<String>,
    /// `metadata.stats.session_cost`, 0 when absent.
    pub session_cost: f64,
}

/// A parsed log file together with its filesystem facts.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub entry: SessionLogEntry,
}

/// Result of reading one file.  Failures are values, not errors, so scans
/// can skip and continue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRead {
    Parsed(SessionRecord),
    Unreadable { path: PathBuf, reason: String },
}

impl SessionRead {
    pub fn parsed(self) -> Option<SessionRecord> {
        match self {
            SessionRead::Parsed(record) => Some(record),
            SessionRead::Unreadable { path, reason } => {
                debug!(path = %path.display(), %reason, "skipping unreadable session log");
                None
            }
        }
    }
}

// ── Store ────────────────────────────────────────────────────

/// Source of session log files.
pub trait SessionLog: Send + Sync {
    /// Every log file currently present.  Never fails; an absent or
    /// unreadable directory yields an empty set.
    fn list_session_files(&self) -> BTreeSet<PathBuf>;

    /// Read and parse one file.
    fn read_session(&self, path: &Path) -> SessionRead;

    /// Parse every listed file, dropping the ones that fail.
    fn read_all(&self) -> Vec<SessionRecord> {
        self.list_session_files()
            .iter()
            .filter_map(|p| self.read_session(p).parsed())
            .collect()
    }
}

/// [`SessionLog`] backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirSessionLog {
    dir: PathBuf,
}

impl DirSessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SessionLog for DirSessionLog {
    fn list_session_files(&self) -> BTreeSet<PathBuf> {
        let rd = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "session log directory not readable");
                return BTreeSet::new();
            }
        };
        rd.filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(LOG_EXTENSION))
            })
            .map(|entry| entry.path())
            .collect()
    }

    fn read_session(&self, path: &Path) -> SessionRead {
        let unreadable = |reason: String| SessionRead::Unreadable {
            path: path.to_path_buf(),
            reason,
        };
        let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => return unreadable(format!("stat: {e}")),
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => return unreadable(format!("read: {e}")),
        };
        match parse_entry(&raw) {
            Ok(entry) => SessionRead::Parsed(SessionRecord {
                path: path.to_path_buf(),
                modified,
                entry,
            }),
            Err(e) => unreadable(format!("parse: {e}")),
        }
    }
}

// ── Parsing ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawSession {
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    session_id: Option<Value>,
    #[serde(default)]
    start_time: Option<Value>,
    #[serde(default)]
    environment: Option<RawEnvironment>,
    #[serde(default)]
    stats: Option<RawStats>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnvironment {
    #[serde(default)]
    working_directory: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStats {
    #[serde(default)]
    session_cost: Option<Value>,
}

/// Parse the text of one session log.
///
/// The document must be a JSON object; a missing `metadata` block yields an
/// entry with every field empty.
pub fn parse_entry(raw: &str) -> anyhow::Result<SessionLogEntry> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        anyhow::bail!("session log is not a JSON object");
    }
    let session: RawSession = serde_json::from_value(value)?;
    let meta = session.metadata.unwrap_or_default();

    Ok(SessionLogEntry {
        session_id: meta
            .session_id
            .and_then(|v| v.as_str().map(str::to_string)),
        start_time: meta.start_time.as_ref().and_then(parse_start_time),
        working_directory: meta
            .environment
            .and_then(|e| e.working_directory)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty()),
        session_cost: meta
            .stats
            .and_then(|s| s.session_cost)
            .map(|v| parse_cost(&v))
            .unwrap_or(0.0),
    })
}

/// Accepts RFC 3339, naive ISO timestamps (local time, as Vibe writes
/// them) and epoch milliseconds.
pub fn parse_start_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .and_then(|naive| Local.from_local_datetime(&naive).earliest())
                .map(|dt| dt.with_timezone(&Utc))
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

fn parse_cost(value: &Value) -> f64 {
    let cost = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if cost.is_finite() {
        cost
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_metadata() {
        let raw = json!({
            "metadata": {
                "session_id": "abc",
                "start_time": "2025-03-04T05:06:07Z",
                "environment": { "working_directory": "/work" },
                "stats": { "session_cost": 0.125 }
            },
            "messages": []
        })
        .to_string();
        let entry = parse_entry(&raw).unwrap();
        assert_eq!(entry.session_id.as_deref(), Some("abc"));
        assert_eq!(
            entry.start_time.unwrap().to_rfc3339(),
            "2025-03-04T05:06:07+00:00"
        );
        assert_eq!(entry.working_directory.as_deref(), Some("/work"));
        assert_eq!(entry.session_cost, 0.125);
    }

    #[test]
    fn missing_fields_default() {
        let entry = parse_entry(r#"{"metadata": {"session_id": 7}}"#).unwrap();
        assert_eq!(entry.session_id, None);
        assert_eq!(entry.start_time, None);
        assert_eq!(entry.working_directory, None);
        assert_eq!(entry.session_cost, 0.0);

        let entry = parse_entry("{}").unwrap();
        assert_eq!(entry, SessionLogEntry::default());
    }

    #[test]
    fn rejects_malformed_or_non_object() {
        assert!(parse_entry("{not json").is_err());
        assert!(parse_entry("[1, 2]").is_err());
        assert!(parse_entry("null").is_err());
    }

    #[test]
    fn cost_accepts_numeric_strings() {
        let entry = parse_entry(r#"{"metadata": {"stats": {"session_cost": "1.5"}}}"#).unwrap();
        assert_eq!(entry.session_cost, 1.5);
    }

    #[test]
    fn start_time_accepts_epoch_millis() {
        let dt = parse_start_time(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert!(parse_start_time(&json!("yesterday")).is_none());
        assert!(parse_start_time(&json!(true)).is_none());
    }

    #[test]
    fn start_time_accepts_naive_local_timestamps() {
        let dt = parse_start_time(&json!("2025-03-04T05:06:07.123456")).unwrap();
        let expected = Local
            .from_local_datetime(
                &NaiveDateTime::parse_from_str("2025-03-04T05:06:07.123456", "%Y-%m-%dT%H:%M:%S%.f")
                    .unwrap(),
            )
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(dt, expected);
    }

    #[test]
    fn dir_store_lists_only_json_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "{}").unwrap();
        std::fs::create_dir(tmp.path().join("nested.json")).unwrap();

        let store = DirSessionLog::new(tmp.path());
        let files: Vec<_> = store.list_session_files().into_iter().collect();
        assert_eq!(files, vec![tmp.path().join("a.json")]);
    }

    #[test]
    fn dir_store_missing_directory_is_empty() {
        let store = DirSessionLog::new("/no/such/session/dir");
        assert!(store.list_session_files().is_empty());
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn read_session_tags_parse_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, "{oops").unwrap();
        let store = DirSessionLog::new(tmp.path());
        assert!(matches!(
            store.read_session(&bad),
            SessionRead::Unreadable { .. }
        ));
    }
}
