//! Works out which session log belongs to the run that just finished.
//!
//! Vibe does not print its session id, so the adapter snapshots the log
//! directory before spawning and diffs it afterwards.  Candidates are
//! ranked by working-directory match first and modification time second.
//! This is best effort: two concurrent runs in the same project directory
//! can claim each other's file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::debug;

use super::{SessionLog, SessionRecord};
use crate::state::canonical_key;

/// How far before the recorded start a file's mtime may be and still
/// count as written by this run.
pub const RECENCY_SKEW: Duration = Duration::from_secs(2);

/// Maps "state before the run" to the session id the run produced.
pub trait SessionResolver: Send + Sync {
    fn resolve(
        &self,
        before: &BTreeSet<PathBuf>,
        start: SystemTime,
        project_dir: &Path,
    ) -> Option<String>;
}

/// [`SessionResolver`] that diffs directory listings of a [`SessionLog`].
#[derive(Clone)]
pub struct LogDiffResolver {
    log: Arc<dyn SessionLog>,
}

impl LogDiffResolver {
    pub fn new(log: Arc<dyn SessionLog>) -> Self {
        Self { log }
    }
}

impl SessionResolver for LogDiffResolver {
    fn resolve(
        &self,
        before: &BTreeSet<PathBuf>,
        start: SystemTime,
        project_dir: &Path,
    ) -> Option<String> {
        let after = self.log.list_session_files();
        let records: Vec<SessionRecord> = candidate_paths(before, &after)
            .iter()
            .filter_map(|p| self.log.read_session(p).parsed())
            .collect();
        select_session(records, start, project_dir)
    }
}

/// Files that appeared since `before`, or every file in `after` when none
/// did (Vibe may rewrite an existing log instead of creating one).
pub fn candidate_paths(before: &BTreeSet<PathBuf>, after: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    let new: Vec<PathBuf> = after.difference(before).cloned().collect();
    if new.is_empty() {
        after.iter().cloned().collect()
    } else {
        new
    }
}

/// Pick the best record and return its session id.
///
/// Priority: directory match and recent, then directory match, then the
/// most recently modified record.  A selected record without a non-empty
/// string id yields `None`; no further candidates are tried.
pub fn select_session(
    mut records: Vec<SessionRecord>,
    start: SystemTime,
    project_dir: &Path,
) -> Option<String> {
    let project_key = canonical_key(project_dir);
    let threshold = start.checked_sub(RECENCY_SKEW).unwrap_or(start);

    records.sort_by(|a, b| b.modified.cmp(&a.modified));

    let scored: Vec<(bool, bool, &SessionRecord)> = records
        .iter()
        .map(|r| {
            let matches_dir = r
                .entry
                .working_directory
                .as_deref()
                .is_some_and(|wd| canonical_key(Path::new(wd)) == project_key);
            let recent = r.modified >= threshold;
            (matches_dir, recent, r)
        })
        .collect();

    let best = scored
        .iter()
        .find(|(dir, recent, _)| *dir && *recent)
        .or_else(|| scored.iter().find(|(dir, _, _)| *dir))
        .or_else(|| scored.first())
        .map(|(_, _, r)| *r)?;

    debug!(path = %best.path.display(), session_id = ?best.entry.session_id, "session log selected");

    best.entry
        .session_id
        .clone()
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionLogEntry;

    fn record(name: &str, id: &str, dir: Option<&str>, modified: SystemTime) -> SessionRecord {
        SessionRecord {
            path: PathBuf::from(format!("/logs/{name}.json")),
            modified,
            entry: SessionLogEntry {
                session_id: Some(id.to_string()),
                working_directory: dir.map(str::to_string),
                ..Default::default()
            },
        }
    }

    fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn new_files_win_over_existing() {
        let before = set(&["/l/a.json"]);
        let after = set(&["/l/a.json", "/l/b.json"]);
        assert_eq!(candidate_paths(&before, &after), vec![PathBuf::from("/l/b.json")]);
    }

    #[test]
    fn no_new_files_means_everything_is_a_candidate() {
        let before = set(&["/l/a.json", "/l/b.json"]);
        let after = set(&["/l/a.json", "/l/b.json"]);
        assert_eq!(candidate_paths(&before, &after).len(), 2);
    }

    #[test]
    fn directory_match_beats_newer_unrelated_file() {
        let start = SystemTime::now();
        let records = vec![
            record("other", "other-id", Some("/somewhere/else"), start + Duration::from_secs(5)),
            record("mine", "mine-id", Some("/proj/that/does/not/exist"), start - Duration::from_secs(600)),
        ];
        assert_eq!(
            select_session(records, start, Path::new("/proj/that/does/not/exist")),
            Some("mine-id".to_string())
        );
    }

    #[test]
    fn newest_of_several_directory_matches_wins() {
        let start = SystemTime::now();
        let dir = "/proj/recency";
        let records = vec![
            record("old", "old-id", Some(dir), start - Duration::from_secs(60)),
            record("fresh", "fresh-id", Some(dir), start - Duration::from_secs(1)),
        ];
        assert_eq!(
            select_session(records, start, Path::new(dir)),
            Some("fresh-id".to_string())
        );
    }

    #[test]
    fn falls_back_to_most_recent_without_directory_metadata() {
        let start = SystemTime::now();
        let records = vec![
            record("a", "a-id", None, start - Duration::from_secs(30)),
            record("b", "b-id", None, start + Duration::from_secs(1)),
        ];
        assert_eq!(
            select_session(records, start, Path::new("/proj")),
            Some("b-id".to_string())
        );
    }

    #[test]
    fn empty_or_missing_id_yields_none() {
        let start = SystemTime::now();
        assert_eq!(select_session(Vec::new(), start, Path::new("/p")), None);
        let records = vec![record("a", "", Some("/p"), start)];
        assert_eq!(select_session(records, start, Path::new("/p")), None);
    }
}
