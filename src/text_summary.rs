//! Text rendering for CLI output.
//!
//! This module formats pipeline events and the final session report as
//! human-readable lines for text mode.

use crate::model::{PipelineEvent, Task, TaskStatus};
use crate::orchestrator::SessionReport;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

const BAR_WIDTH: usize = 20;

/// Fixed-width progress bar, e.g. `[########------------]`.
pub(crate) fn progress_bar(progress: u8) -> String {
    let filled = (usize::from(progress.min(100)) * BAR_WIDTH) / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

fn short_id(task_id: &str) -> &str {
    match task_id.char_indices().nth(8) {
        Some((idx, _)) => &task_id[..idx],
        None => task_id,
    }
}

/// One status line for a task, as shown while polling.
pub(crate) fn task_line(task: &Task) -> String {
    let detail = match task.status {
        TaskStatus::Completed => "completed, data ready".to_string(),
        TaskStatus::Failed => match task.error.as_deref() {
            Some(err) => format!("failed: {err}"),
            None => "failed".to_string(),
        },
        TaskStatus::Processing => task
            .message
            .clone()
            .unwrap_or_else(|| "processing".to_string()),
        TaskStatus::Queued => "queued for processing".to_string(),
    };
    format!(
        "Mine {:>2} {} {} {:>3}% {}",
        task.mine_id,
        short_id(&task.task_id),
        progress_bar(task.progress),
        task.progress,
        detail
    )
}

/// Render a live event as a single line, or `None` for events text mode skips.
pub(crate) fn render_event(ev: &PipelineEvent) -> Option<String> {
    match ev {
        PipelineEvent::BatchStarted { mines, date_range } => {
            let list: Vec<String> = mines.iter().map(|m| m.to_string()).collect();
            Some(format!(
                "Submitting {} mine(s) [{}] for {}",
                mines.len(),
                list.join(", "),
                date_range
            ))
        }
        PipelineEvent::TaskSubmitted { mine_id, task_id } => {
            Some(format!("Mine {mine_id}: queued as task {task_id}"))
        }
        PipelineEvent::SubmitFailed { mine_id, error } => {
            Some(format!("Mine {mine_id}: submission failed: {error}"))
        }
        PipelineEvent::BatchFinished { submitted, failed } => Some(format!(
            "Submission finished: {submitted} accepted, {failed} failed"
        )),
        PipelineEvent::TaskUpdated { task } => Some(task_line(task)),
        PipelineEvent::PollFailed { task_id, error } => Some(format!(
            "Task {}: status check failed, retrying: {error}",
            short_id(task_id)
        )),
        PipelineEvent::Info(info) => Some(info.to_message()),
        PipelineEvent::SessionCompleted { .. } => None,
    }
}

/// Build the closing summary for a finished session.
pub(crate) fn build_text_summary(report: &SessionReport) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "Backend: {}  Window: {} .. {}",
        report.api_url, report.start_date, report.end_date
    ));
    for task in &report.tasks {
        lines.push(task_line(task));
        if task.status == TaskStatus::Completed {
            if let Some(result) = task.result.as_ref() {
                lines.push(format!("    result: {result}"));
            }
        }
    }
    for failure in &report.submit_failures {
        lines.push(format!(
            "Mine {:>2} not submitted: {}",
            failure.mine_id, failure.error
        ));
    }
    for entry in &report.kpis {
        match (&entry.kpi, &entry.error) {
            (Some(kpi), _) => lines.push(format!("Mine {:>2} KPI: {kpi}", entry.mine_id)),
            (None, Some(err)) => lines.push(format!(
                "Mine {:>2} KPI unavailable: {err}",
                entry.mine_id
            )),
            (None, None) => {}
        }
    }
    lines.push(format!(
        "Tasks: {} completed, {} failed, {} unfinished; {} submission(s) rejected",
        report.completed,
        report.failed,
        report.unfinished,
        report.submit_failures.len()
    ));

    TextSummary { lines }
}
