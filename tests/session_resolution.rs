//! Session resolution and cost summaries over a real log directory.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{TimeZone, Utc};
use filetime::FileTime;
use tempfile::TempDir;
use vibe_mcp::cost::compute_monthly_cost;
use vibe_mcp::session::resolver::{LogDiffResolver, SessionResolver};
use vibe_mcp::session::{DirSessionLog, SessionLog};

fn write_log(dir: &Path, name: &str, id: &str, cwd: &Path, start: &str, cost: f64, mtime: SystemTime) {
    let body = serde_json::json!({
        "metadata": {
            "session_id": id,
            "start_time": start,
            "environment": { "working_directory": cwd },
            "stats": { "session_cost": cost }
        },
        "messages": []
    });
    let path = dir.join(name);
    std::fs::write(&path, body.to_string()).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
}

struct Dirs {
    _tmp: TempDir,
    logs: std::path::PathBuf,
    project: std::path::PathBuf,
    other: std::path::PathBuf,
}

fn dirs() -> Dirs {
    let tmp = TempDir::new().unwrap();
    let logs = tmp.path().join("logs");
    let project = tmp.path().join("project");
    let other = tmp.path().join("other");
    for d in [&logs, &project, &other] {
        std::fs::create_dir_all(d).unwrap();
    }
    Dirs {
        _tmp: tmp,
        logs,
        project,
        other,
    }
}

#[test]
fn new_log_for_project_wins_over_newer_foreign_log() {
    let d = dirs();
    let log = Arc::new(DirSessionLog::new(&d.logs));
    let now = SystemTime::now();
    write_log(&d.logs, "old.json", "s-old", &d.project, "2026-01-01T00:00:00Z", 0.1, now - Duration::from_secs(3600));
    let before = log.list_session_files();

    write_log(&d.logs, "mine.json", "s-mine", &d.project, "2026-01-01T01:00:00Z", 0.1, now);
    write_log(&d.logs, "theirs.json", "s-theirs", &d.other, "2026-01-01T01:00:00Z", 0.1, now + Duration::from_secs(5));

    let resolver = LogDiffResolver::new(log);
    assert_eq!(
        resolver.resolve(&before, now, &d.project).as_deref(),
        Some("s-mine")
    );
}

#[test]
fn rewritten_log_is_found_when_nothing_new_appears() {
    let d = dirs();
    let log = Arc::new(DirSessionLog::new(&d.logs));
    let now = SystemTime::now();
    write_log(&d.logs, "a.json", "s-a", &d.other, "2026-01-01T00:00:00Z", 0.0, now - Duration::from_secs(600));
    write_log(&d.logs, "b.json", "s-b", &d.project, "2026-01-01T00:00:00Z", 0.0, now - Duration::from_secs(900));
    let before = log.list_session_files();

    // Same file set; the project's log is the only directory match.
    let resolver = LogDiffResolver::new(log);
    assert_eq!(resolver.resolve(&before, now, &d.project).as_deref(), Some("s-b"));
}

#[test]
fn falls_back_to_newest_log_and_skips_garbage() {
    let d = dirs();
    let log = Arc::new(DirSessionLog::new(&d.logs));
    let now = SystemTime::now();
    let before: BTreeSet<_> = log.list_session_files();
    assert!(before.is_empty());

    write_log(&d.logs, "x.json", "s-x", &d.other, "2026-01-01T00:00:00Z", 0.0, now - Duration::from_secs(30));
    write_log(&d.logs, "y.json", "s-y", &d.other, "2026-01-01T00:00:00Z", 0.0, now);
    std::fs::write(d.logs.join("broken.json"), "{ not json").unwrap();
    std::fs::write(d.logs.join("notes.txt"), "ignored").unwrap();

    assert_eq!(log.list_session_files().len(), 3);
    let resolver = LogDiffResolver::new(log);
    assert_eq!(resolver.resolve(&before, now, &d.project).as_deref(), Some("s-y"));
}

#[test]
fn empty_directory_resolves_nothing() {
    let d = dirs();
    let log = Arc::new(DirSessionLog::new(d.logs.join("missing")));
    let resolver = LogDiffResolver::new(log);
    assert!(resolver
        .resolve(&BTreeSet::new(), SystemTime::now(), &d.project)
        .is_none());
}

#[test]
fn monthly_cost_over_directory() {
    let d = dirs();
    let now = SystemTime::now();
    write_log(&d.logs, "1.json", "s1", &d.project, "2026-03-02T10:00:00Z", 0.5, now);
    write_log(&d.logs, "2.json", "s2", &d.project, "2026-03-20T10:00:00Z", 0.25, now);
    write_log(&d.logs, "3.json", "s3", &d.project, "2026-02-28T23:00:00Z", 4.0, now);
    std::fs::write(d.logs.join("4.json"), "[]").unwrap();

    let log = DirSessionLog::new(&d.logs);
    let summary = compute_monthly_cost(&log, Utc.with_ymd_and_hms(2026, 3, 25, 0, 0, 0).unwrap());
    assert!((summary.monthly_total - 0.75).abs() < 1e-9);
    assert_eq!(summary.last_task_cost, Some(0.25));
}
