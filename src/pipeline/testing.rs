//! Scripted in-memory backend shared by pipeline and controller tests.

use crate::backend::{BackendError, PipelineBackend};
use crate::model::{DateRange, MineId, StatusResponse, SubmitResponse, TaskId, TaskStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply to a status query.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    delay: Duration,
    reply: Result<StatusResponse, u16>,
}

impl Step {
    pub(crate) fn reply(task_id: &str, status: TaskStatus, progress: u8) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Ok(StatusResponse {
                task_id: task_id.into(),
                status,
                progress,
                message: None,
                result: None,
                error: None,
            }),
        }
    }

    pub(crate) fn body(body: StatusResponse) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Ok(body),
        }
    }

    pub(crate) fn fail(status: u16) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Err(status),
        }
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    submits: Mutex<HashMap<MineId, Result<TaskId, u16>>>,
    submit_delay: Duration,
    // Replies are consumed front to back; the last one repeats.
    statuses: Mutex<HashMap<TaskId, VecDeque<Step>>>,
    submit_calls: Mutex<Vec<(MineId, DateRange)>>,
    status_calls: Mutex<Vec<TaskId>>,
    sync_calls: Mutex<Vec<MineId>>,
    kpis: Mutex<HashMap<MineId, Result<serde_json::Value, u16>>>,
    kpi_calls: Mutex<Vec<(MineId, DateRange)>>,
    submits_in_flight: AtomicUsize,
    max_submits_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub(crate) fn accept(self, mine_id: MineId, task_id: &str) -> Self {
        lock(&self.submits).insert(mine_id, Ok(task_id.to_string()));
        self
    }

    pub(crate) fn reject(self, mine_id: MineId, status: u16) -> Self {
        lock(&self.submits).insert(mine_id, Err(status));
        self
    }

    pub(crate) fn kpi_reply(self, mine_id: MineId, reply: Result<serde_json::Value, u16>) -> Self {
        lock(&self.kpis).insert(mine_id, reply);
        self
    }

    pub(crate) fn script(self, task_id: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        lock(&self.statuses)
            .entry(task_id.to_string())
            .or_default()
            .extend(steps);
        self
    }

    pub(crate) fn submit_calls(&self) -> Vec<MineId> {
        lock(&self.submit_calls).iter().map(|(m, _)| *m).collect()
    }

    pub(crate) fn submitted_ranges(&self) -> Vec<DateRange> {
        lock(&self.submit_calls).iter().map(|(_, r)| r.clone()).collect()
    }

    pub(crate) fn status_calls(&self) -> Vec<TaskId> {
        lock(&self.status_calls).clone()
    }

    pub(crate) fn status_calls_for(&self, task_id: &str) -> usize {
        lock(&self.status_calls)
            .iter()
            .filter(|id| id.as_str() == task_id)
            .count()
    }

    pub(crate) fn sync_calls(&self) -> Vec<MineId> {
        lock(&self.sync_calls).clone()
    }

    pub(crate) fn kpi_calls(&self) -> Vec<(MineId, DateRange)> {
        lock(&self.kpi_calls).clone()
    }

    pub(crate) fn max_concurrent_submits(&self) -> usize {
        self.max_submits_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, task_id: &str) -> Option<Step> {
        let mut statuses = lock(&self.statuses);
        let queue = statuses.get_mut(task_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn status_error(endpoint: &str, status: u16) -> BackendError {
    BackendError::Status {
        endpoint: endpoint.to_string(),
        status,
        body: None,
    }
}

impl PipelineBackend for ScriptedBackend {
    async fn submit(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> Result<SubmitResponse, BackendError> {
        lock(&self.submit_calls).push((mine_id, range.clone()));
        let now = self.submits_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_submits_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.submit_delay).await;

        self.submits_in_flight.fetch_sub(1, Ordering::SeqCst);
        let scripted = lock(&self.submits).get(&mine_id).cloned();
        match scripted {
            Some(Ok(task_id)) => Ok(SubmitResponse {
                task_id,
                status: Some(TaskStatus::Queued),
            }),
            Some(Err(status)) => Err(status_error("POST /admin/submit", status)),
            None => Err(status_error("POST /admin/submit", 422)),
        }
    }

    async fn status(&self, task_id: &str) -> Result<StatusResponse, BackendError> {
        lock(&self.status_calls).push(task_id.to_string());
        let endpoint = format!("GET /admin/status/{task_id}");
        let Some(step) = self.next_step(task_id) else {
            return Err(status_error(&endpoint, 404));
        };
        tokio::time::sleep(step.delay).await;
        step.reply.map_err(|status| status_error(&endpoint, status))
    }

    async fn run_sync(
        &self,
        mine_id: MineId,
        _range: &DateRange,
    ) -> Result<serde_json::Value, BackendError> {
        lock(&self.sync_calls).push(mine_id);
        let scripted = lock(&self.submits).get(&mine_id).cloned();
        match scripted {
            Some(Ok(_)) => Ok(serde_json::json!({
                "status": "success",
                "mine_id": mine_id,
                "rows_inserted": 10,
            })),
            Some(Err(status)) => Err(status_error("POST /admin/run", status)),
            None => Err(status_error("POST /admin/run", 400)),
        }
    }

    async fn health(&self) -> Result<serde_json::Value, BackendError> {
        Ok(serde_json::json!({"status": "running"}))
    }

    async fn kpi(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> Result<serde_json::Value, BackendError> {
        lock(&self.kpi_calls).push((mine_id, range.clone()));
        let endpoint = format!("GET /mine/kpi/{mine_id}");
        match lock(&self.kpis).get(&mine_id).cloned() {
            Some(Ok(body)) => Ok(body),
            Some(Err(status)) => Err(status_error(&endpoint, status)),
            None => Err(status_error(&endpoint, 404)),
        }
    }
}
