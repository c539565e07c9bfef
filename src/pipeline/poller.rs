use crate::backend::{BackendError, PipelineBackend};
use crate::model::{StatusResponse, TaskId};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Answer (or failure) for one status query.
#[derive(Debug)]
pub struct PollOutcome {
    pub task_id: TaskId,
    /// Monotonic per poller; later requests carry larger numbers.
    pub seq: u64,
    pub result: Result<StatusResponse, BackendError>,
}

#[derive(Debug)]
pub enum PollerEvent {
    /// The interval elapsed; the owner should call [`Poller::issue`].
    Tick,
    Outcome(PollOutcome),
}

/// Periodic status poller.
///
/// The timer is a scoped resource: it exists only between [`Poller::start`] and
/// [`Poller::stop`] and is released when the poller is dropped. Requests already
/// in flight are not tied to a tick, so a hung query never holds up later ticks.
/// At most one query per task is outstanding; a tick skips tasks still waiting on
/// an answer.
pub struct Poller<B> {
    backend: Arc<B>,
    period: Duration,
    timer: Option<Interval>,
    in_flight: FuturesUnordered<BoxFuture<'static, PollOutcome>>,
    pending: HashSet<TaskId>,
    next_seq: u64,
}

impl<B: PipelineBackend> Poller<B> {
    pub fn new(backend: Arc<B>, period: Duration) -> Self {
        Self {
            backend,
            period: period.max(Duration::from_millis(1)),
            timer: None,
            in_flight: FuturesUnordered::new(),
            pending: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Arm the interval. The first tick fires one full period from now.
    pub fn start(&mut self) {
        if self.timer.is_some() {
            return;
        }
        let mut timer = interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        debug!(period = ?self.period, "status poller started");
    }

    /// Release the interval. Outstanding requests still deliver their outcomes.
    pub fn stop(&mut self) {
        if self.timer.take().is_some() {
            debug!("status poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Fire one status query per id, all in parallel, skipping ids whose previous
    /// query has not answered yet. Returns how many were issued.
    pub fn issue<'a>(&mut self, task_ids: impl IntoIterator<Item = &'a TaskId>) -> usize {
        let mut issued = 0;
        for task_id in task_ids {
            if !self.pending.insert(task_id.clone()) {
                debug!(task_id = %task_id, "previous status query still in flight");
                continue;
            }
            self.next_seq += 1;
            let seq = self.next_seq;
            let backend = Arc::clone(&self.backend);
            let task_id = task_id.clone();
            self.in_flight.push(Box::pin(async move {
                let result = backend
                    .status(&task_id)
                    .await
                    .and_then(|resp| validate_status(&task_id, resp));
                PollOutcome {
                    task_id,
                    seq,
                    result,
                }
            }));
            issued += 1;
        }
        issued
    }

    /// Wait for the next tick or completed query, whichever comes first.
    ///
    /// Pends forever when stopped with nothing in flight. Cancel-safe.
    pub async fn next_event(&mut self) -> PollerEvent {
        let has_in_flight = !self.in_flight.is_empty();
        let Self {
            timer,
            in_flight,
            pending,
            ..
        } = self;

        tokio::select! {
            Some(outcome) = in_flight.next(), if has_in_flight => {
                pending.remove(&outcome.task_id);
                PollerEvent::Outcome(outcome)
            }
            _ = async {
                match timer.as_mut() {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => futures::future::pending::<()>().await,
                }
            } => PollerEvent::Tick,
        }
    }
}

/// Reject bodies that decoded but cannot belong to the task that was asked about.
fn validate_status(task_id: &str, resp: StatusResponse) -> Result<StatusResponse, BackendError> {
    let endpoint = || format!("GET /admin/status/{task_id}");
    if resp.task_id != task_id {
        return Err(BackendError::malformed(
            endpoint(),
            format!("response is for task {}", resp.task_id),
        ));
    }
    if resp.progress > 100 {
        return Err(BackendError::malformed(
            endpoint(),
            format!("progress {} exceeds 100", resp.progress),
        ));
    }
    Ok(resp)
}
