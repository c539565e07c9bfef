use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;

/// Index of a monitored mine within the backend's shapefile.
pub type MineId = u32;

/// Opaque identifier assigned by the backend when a job is submitted.
pub type TaskId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub api_url: String,
    pub mine_count: usize,
    pub date_range: DateRange,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

/// Inclusive processing window, kept as the `YYYY-MM-DD` strings the backend expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: String,
    pub end_date: String,
}

/// Window preselected when no dates are given.
pub const DEFAULT_START_DATE: &str = "2025-01-01";
pub const DEFAULT_END_DATE: &str = "2025-08-01";

impl Default for DateRange {
    fn default() -> Self {
        Self::new(DEFAULT_START_DATE, DEFAULT_END_DATE)
    }
}

impl DateRange {
    pub fn new(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
        }
    }

    /// True when both bounds parse and the start falls after the end.
    ///
    /// Ordering is never enforced; callers only use this to warn.
    pub fn is_reversed(&self) -> bool {
        match (parse_date(&self.start_date), parse_date(&self.end_date)) {
            (Ok(start), Ok(end)) => start > end,
            _ => false,
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_date, self.end_date)
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> Result<time::Date, time::error::Parse> {
    time::Date::parse(raw, format_description!("[year]-[month]-[day]"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks are never polled again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locally tracked state of one backend job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub mine_id: MineId,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Task {
    /// Record created when the backend accepts a submission.
    pub fn queued(task_id: impl Into<TaskId>, mine_id: MineId) -> Self {
        Self {
            task_id: task_id.into(),
            mine_id,
            status: TaskStatus::Queued,
            progress: 0,
            message: None,
            result: None,
            error: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Replace every mutable field with the poll response. `mine_id` never changes.
    pub fn replace_with(&mut self, update: StatusResponse) {
        self.status = update.status;
        self.progress = update.progress;
        self.message = update.message.filter(|m| !m.trim().is_empty());
        self.result = update.result;
        self.error = update.error;
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Body of `POST /admin/submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

/// Body of `GET /admin/status/{task_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Events emitted by the session controller and consumed by presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    BatchStarted {
        mines: Vec<MineId>,
        date_range: DateRange,
    },
    TaskSubmitted {
        mine_id: MineId,
        task_id: TaskId,
    },
    SubmitFailed {
        mine_id: MineId,
        error: String,
    },
    BatchFinished {
        submitted: usize,
        failed: usize,
    },
    TaskUpdated {
        task: Task,
    },
    PollFailed {
        task_id: TaskId,
        error: String,
    },
    Info(InfoEvent),
    SessionCompleted {
        tasks: Vec<Task>,
    },
}

/// Structured info events emitted by the controller and consumed by CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    EmptySelection,
    BatchInProgress,
    ReversedDateRange { date_range: DateRange },
    PollingStarted {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    PollingStopped,
}

impl InfoEvent {
    /// Render a human-readable message for CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::EmptySelection => "No mines selected; nothing to submit".to_string(),
            InfoEvent::BatchInProgress => {
                "A submission batch is already running; ignoring request".to_string()
            }
            InfoEvent::ReversedDateRange { date_range } => format!(
                "Start date {} is after end date {}; submitting anyway",
                date_range.start_date, date_range.end_date
            ),
            InfoEvent::PollingStarted { interval } => format!(
                "Polling task status every {}",
                humantime::format_duration(*interval)
            ),
            InfoEvent::PollingStopped => "All tasks finished; polling stopped".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names_are_lowercase() {
        let s: TaskStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(s, TaskStatus::Processing);
        assert_eq!(serde_json::to_string(&TaskStatus::Failed).unwrap(), "\"failed\"");
        assert!(serde_json::from_str::<TaskStatus>("\"paused\"").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn status_response_accepts_backend_body() {
        let body = r#"{
            "task_id": "abc",
            "status": "completed",
            "progress": 100,
            "message": "Completed!",
            "result": {"status": "success", "mine_id": 3, "rows_inserted": 1200},
            "error": null
        }"#;
        let resp: StatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.status, TaskStatus::Completed);
        assert_eq!(resp.progress, 100);
        assert_eq!(resp.result.unwrap()["rows_inserted"], 1200);
        assert!(resp.error.is_none());
    }

    #[test]
    fn status_response_requires_status_and_progress() {
        assert!(serde_json::from_str::<StatusResponse>(r#"{"task_id": "abc"}"#).is_err());
    }

    #[test]
    fn replace_drops_fields_missing_from_update() {
        let mut task = Task::queued("abc", 4);
        task.message = Some("Fetching imagery".into());
        task.replace_with(StatusResponse {
            task_id: "abc".into(),
            status: TaskStatus::Processing,
            progress: 40,
            message: None,
            result: None,
            error: None,
        });
        assert_eq!(task.mine_id, 4);
        assert_eq!(task.progress, 40);
        assert!(task.message.is_none());
    }

    #[test]
    fn updated_at_serializes_as_rfc3339() {
        let task = Task::queued("abc", 4);
        let json = serde_json::to_value(&task).unwrap();
        let stamp = json["updated_at"].as_str().unwrap();
        let parsed =
            OffsetDateTime::parse(stamp, &time::format_description::well_known::Rfc3339).unwrap();
        assert_eq!(parsed, task.updated_at);

        let bad = serde_json::json!({
            "task_id": "abc",
            "mine_id": 4,
            "status": "queued",
            "progress": 0,
            "updated_at": "now",
        });
        assert!(serde_json::from_value::<Task>(bad).is_err());
    }

    #[test]
    fn reversed_range_detection() {
        assert!(DateRange::new("2025-08-01", "2025-01-01").is_reversed());
        assert!(!DateRange::new("2025-01-01", "2025-08-01").is_reversed());
        assert!(!DateRange::new("2025-01-01", "2025-01-01").is_reversed());
        assert!(!DateRange::new("garbage", "2025-01-01").is_reversed());
    }

    #[test]
    fn parse_date_rejects_non_iso() {
        assert!(parse_date("2025-02-28").is_ok());
        assert!(parse_date("2025-02-30").is_err());
        assert!(parse_date("01/02/2025").is_err());
    }
}
