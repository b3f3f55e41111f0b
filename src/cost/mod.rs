//! Monthly spend derived from Vibe's session logs.
//!
//! Recomputed from scratch on every call; the number of session files is
//! small and this is not a hot path.

use chrono::{DateTime, Datelike, Utc};

use crate::session::SessionLog;

/// Spend figures shown after every run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostSummary {
    /// Sum of `session_cost` for sessions started in the current UTC month.
    pub monthly_total: f64,
    /// Cost of the session with the latest `start_time`, in any month.
    pub last_task_cost: Option<f64>,
}

/// Scan every session log and summarise costs relative to `now`.
///
/// Entries without a usable `start_time` are ignored for both figures.
pub fn compute_monthly_cost(log: &dyn SessionLog, now: DateTime<Utc>) -> CostSummary {
    let mut summary = CostSummary::default();
    let mut latest: Option<DateTime<Utc>> = None;

    for record in log.read_all() {
        let Some(start) = record.entry.start_time else {
            continue;
        };
        let cost = record.entry.session_cost;

        if start.year() == now.year() && start.month() == now.month() {
            summary.monthly_total += cost;
        }

        if latest.map_or(true, |t| start > t) {
            latest = Some(start);
            summary.last_task_cost = Some(cost);
        }
    }

    summary
}
