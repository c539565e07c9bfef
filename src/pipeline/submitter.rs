use crate::backend::{BackendError, PipelineBackend};
use crate::model::{DateRange, MineId, TaskId};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Result of submitting one mine.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub mine_id: MineId,
    pub result: Result<TaskId, BackendError>,
}

/// Per-mine results of a batch, in issue order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub submitted: Vec<(MineId, TaskId)>,
    pub failed: Vec<(MineId, String)>,
}

/// Messages sent back to the session while a batch runs.
#[derive(Debug)]
pub enum SubmitEvent {
    Outcome(SubmitOutcome),
    /// Always the last message of a batch.
    Finished(BatchReport),
}

/// Issues one job submission per mine, strictly one at a time.
pub struct Submitter<B> {
    backend: Arc<B>,
}

impl<B> Clone for Submitter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: PipelineBackend> Submitter<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Submit a single mine and return the task id the backend assigned.
    pub async fn submit_one(&self, mine_id: MineId, range: &DateRange) -> Result<TaskId, BackendError> {
        let resp = self.backend.submit(mine_id, range).await?;
        if resp.task_id.trim().is_empty() {
            return Err(BackendError::malformed(
                "POST /admin/submit",
                "response carried an empty task_id",
            ));
        }
        Ok(resp.task_id)
    }

    /// Submit every mine in `mines`, in order, awaiting each before starting the next.
    ///
    /// A failed submission is reported and the batch moves on to the next mine.
    /// Each outcome is sent on `event_tx` as soon as it is known, followed by
    /// [`SubmitEvent::Finished`].
    pub async fn submit_batch(
        &self,
        mines: &[MineId],
        range: &DateRange,
        event_tx: &UnboundedSender<SubmitEvent>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for &mine_id in mines {
            let result = self.submit_one(mine_id, range).await;
            match &result {
                Ok(task_id) => {
                    info!(mine_id, task_id = %task_id, "pipeline job submitted");
                    report.submitted.push((mine_id, task_id.clone()));
                }
                Err(e) => {
                    warn!(mine_id, error = %e, "pipeline submission failed");
                    report.failed.push((mine_id, e.to_string()));
                }
            }
            let _ = event_tx.send(SubmitEvent::Outcome(SubmitOutcome { mine_id, result }));
        }

        let _ = event_tx.send(SubmitEvent::Finished(report.clone()));
        report
    }
}
