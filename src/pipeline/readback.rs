//! KPI read-back for jobs that finished during the session.

use crate::backend::PipelineBackend;
use crate::model::{DateRange, MineId, Task, TaskId, TaskStatus};
use serde::Serialize;
use tracing::{info, warn};

/// KPI summary (or the reason it is missing) for one completed task.
#[derive(Debug, Clone, Serialize)]
pub struct MineKpi {
    pub mine_id: MineId,
    pub task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kpi: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetch KPIs over `range` for every completed task, one request at a time, in
/// the order given. Failed or unfinished tasks are skipped; a failed fetch is
/// recorded and the rest still run.
pub async fn fetch_completed_kpis<B: PipelineBackend>(
    backend: &B,
    tasks: &[Task],
    range: &DateRange,
) -> Vec<MineKpi> {
    let mut kpis = Vec::new();
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Completed) {
        let (kpi, error) = match backend.kpi(task.mine_id, range).await {
            Ok(body) => {
                info!(mine_id = task.mine_id, task_id = %task.task_id, "fetched KPI");
                (Some(body), None)
            }
            Err(e) => {
                warn!(mine_id = task.mine_id, task_id = %task.task_id, error = %e, "KPI fetch failed");
                (None, Some(e.to_string()))
            }
        };
        kpis.push(MineKpi {
            mine_id: task.mine_id,
            task_id: task.task_id.clone(),
            kpi,
            error,
        });
    }
    kpis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedBackend;

    fn task(id: &str, mine: MineId, status: TaskStatus) -> Task {
        let mut t = Task::queued(id, mine);
        t.status = status;
        t
    }

    #[tokio::test]
    async fn only_completed_tasks_are_read_back() {
        let backend = ScriptedBackend::new()
            .kpi_reply(0, Ok(serde_json::json!({"anomaly_pixels": 12})))
            .kpi_reply(2, Err(500));
        let range = DateRange::new("2025-01-01", "2025-08-01");
        let tasks = vec![
            task("a", 0, TaskStatus::Completed),
            task("b", 1, TaskStatus::Failed),
            task("c", 2, TaskStatus::Completed),
            task("d", 3, TaskStatus::Processing),
        ];

        let kpis = fetch_completed_kpis(&backend, &tasks, &range).await;

        assert_eq!(
            backend.kpi_calls(),
            vec![(0, range.clone()), (2, range.clone())]
        );
        assert_eq!(kpis.len(), 2);
        assert_eq!(kpis[0].kpi.as_ref().unwrap()["anomaly_pixels"], 12);
        assert!(kpis[0].error.is_none());
        assert_eq!(kpis[1].task_id, "c");
        assert!(kpis[1].kpi.is_none());
        assert!(kpis[1].error.as_deref().unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn nothing_completed_means_no_requests() {
        let backend = ScriptedBackend::new();
        let range = DateRange::new("2025-01-01", "2025-08-01");
        let kpis = fetch_completed_kpis(&backend, &[task("a", 0, TaskStatus::Failed)], &range).await;
        assert!(kpis.is_empty());
        assert!(backend.kpi_calls().is_empty());
    }
}
