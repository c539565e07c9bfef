//! Blocking `/admin/run` variant kept for backends without the task queue.

use crate::backend::{BackendError, PipelineBackend};
use crate::model::{DateRange, MineId};
use tracing::{info, warn};

#[derive(Debug)]
pub struct SyncRunOutcome {
    pub mine_id: MineId,
    pub result: Result<serde_json::Value, BackendError>,
}

/// Run the pipeline for each mine in order, waiting for each to finish.
///
/// Like the async batch, a failure is recorded and the next mine still runs.
pub async fn run_sync_batch<B: PipelineBackend>(
    backend: &B,
    mines: &[MineId],
    range: &DateRange,
) -> Vec<SyncRunOutcome> {
    let mut outcomes = Vec::with_capacity(mines.len());
    for &mine_id in mines {
        let result = backend.run_sync(mine_id, range).await;
        match &result {
            Ok(_) => info!(mine_id, "synchronous pipeline run finished"),
            Err(e) => warn!(mine_id, error = %e, "synchronous pipeline run failed"),
        }
        outcomes.push(SyncRunOutcome { mine_id, result });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedBackend;

    #[tokio::test]
    async fn runs_each_mine_in_order_and_keeps_going() {
        let backend = ScriptedBackend::new().accept(3, "x").reject(1, 500).accept(7, "y");
        let range = DateRange::new("2025-01-01", "2025-08-01");

        let outcomes = run_sync_batch(&backend, &[3, 1, 7], &range).await;

        assert_eq!(backend.sync_calls(), vec![3, 1, 7]);
        let ok: Vec<_> = outcomes
            .iter()
            .map(|o| (o.mine_id, o.result.is_ok()))
            .collect();
        assert_eq!(ok, vec![(3, true), (1, false), (7, true)]);
        assert_eq!(outcomes[0].result.as_ref().unwrap()["mine_id"], 3);
    }
}
