//! Post-session processing utilities.
//!
//! Turns the final task snapshot into a report that CLI layers print or serialize.

use crate::model::{MineId, RunConfig, Task, TaskId, TaskStatus};
use crate::pipeline::MineKpi;
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome of a finished session, ready for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SessionReport {
    pub api_url: String,
    pub start_date: String,
    pub end_date: String,
    pub tasks: Vec<Task>,
    pub completed: usize,
    pub failed: usize,
    /// Still queued or processing when the session ended (e.g. interrupted).
    pub unfinished: usize,
    pub submit_failures: Vec<SubmitFailure>,
    /// Filled in only when KPIs were requested. Fetch failures do not affect success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kpis: Vec<MineKpi>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SubmitFailure {
    pub mine_id: MineId,
    pub error: String,
}

impl SessionReport {
    /// True when every submission was accepted and every task completed.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.unfinished == 0 && self.submit_failures.is_empty()
    }
}

/// Build the report for a finished session. Tasks are ordered by mine, then id.
pub(crate) fn process_session_completion(
    cfg: &RunConfig,
    snapshot: BTreeMap<TaskId, Task>,
    submit_failures: Vec<SubmitFailure>,
) -> SessionReport {
    let mut tasks: Vec<Task> = snapshot.into_values().collect();
    tasks.sort_by(|a, b| (a.mine_id, &a.task_id).cmp(&(b.mine_id, &b.task_id)));

    let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
    let completed = count(TaskStatus::Completed);
    let failed = count(TaskStatus::Failed);
    let unfinished = tasks.len() - completed - failed;

    SessionReport {
        api_url: cfg.api_url.clone(),
        start_date: cfg.date_range.start_date.clone(),
        end_date: cfg.date_range.end_date.clone(),
        tasks,
        completed,
        failed,
        unfinished,
        submit_failures,
        kpis: Vec::new(),
    }
}
