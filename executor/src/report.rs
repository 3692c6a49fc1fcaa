//! The Executor's output: a [`PlanResult`] with one [`ChangeReport`] per
//! change (`spec.md` §4.3 step 6).

use std::time::Duration;

use kongctl_planner::Plan;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Applied,
    SkippedNoop,
    SkippedBlocked,
    SkippedStale,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    pub change_id: String,
    pub status: ChangeStatus,
    pub duration_ms: u64,
    pub learned_id: Option<String>,
    pub error: Option<String>,
}

impl ChangeReport {
    pub fn applied(change_id: &str, duration: Duration, learned_id: String) -> Self {
        Self {
            change_id: change_id.to_string(),
            status: ChangeStatus::Applied,
            duration_ms: duration.as_millis() as u64,
            learned_id: Some(learned_id),
            error: None,
        }
    }

    pub fn skipped(change_id: &str, status: ChangeStatus) -> Self {
        Self { change_id: change_id.to_string(), status, duration_ms: 0, learned_id: None, error: None }
    }

    pub fn failed(change_id: &str, duration: Duration, error: String) -> Self {
        Self {
            change_id: change_id.to_string(),
            status: ChangeStatus::Failed,
            duration_ms: duration.as_millis() as u64,
            learned_id: None,
            error: Some(error),
        }
    }
}

/// The full result of executing a [`Plan`]: one report per change plus
/// enough to compute the CLI's exit code (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub reports: Vec<ChangeReport>,
    pub dry_run: bool,
}

impl PlanResult {
    pub fn for_plan(plan: &Plan, dry_run: bool) -> Self {
        Self { reports: Vec::with_capacity(plan.changes.len()), dry_run }
    }

    pub fn push(&mut self, report: ChangeReport) {
        self.reports.push(report);
    }

    pub fn any_failed(&self) -> bool {
        self.reports.iter().any(|r| r.status == ChangeStatus::Failed)
    }

    /// A stale pre-image means the plan is no longer an accurate
    /// description of what happened: the change was skipped rather than
    /// applied or safely deemed a no-op, same severity class as a failure.
    pub fn any_stale(&self) -> bool {
        self.reports.iter().any(|r| r.status == ChangeStatus::SkippedStale)
    }

    /// Exit code per `spec.md` §6: `0` no failures, `2` the plan ran but
    /// some change failed or was skipped as stale. `1`/`3` are reserved
    /// for engine/config errors raised before or outside execution, not
    /// representable here.
    pub fn exit_code(&self) -> i32 {
        if self.any_failed() || self.any_stale() {
            2
        } else {
            0
        }
    }
}
