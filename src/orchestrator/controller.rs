//! Pipeline session controller.
//!
//! Owns the selection, the task store and the active-polling set. The submitter and
//! poller only propose changes; this module applies them and emits events for
//! presentation layers.

use crate::backend::PipelineBackend;
use crate::model::{InfoEvent, PipelineEvent, Task, TaskId};
use crate::pipeline::{BatchReport, PollOutcome, Poller, PollerEvent, SubmitEvent, Submitter};
use crate::selection::SelectionState;
use crate::store::{ActiveSet, ApplyOutcome, TaskStore};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Commands emitted by UI/CLI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    RunPipeline,
    Quit,
}

/// Handle for a submission batch running in its own task.
struct BatchCtx {
    events: UnboundedReceiver<SubmitEvent>,
    handle: tokio::task::JoinHandle<BatchReport>,
}

impl Drop for BatchCtx {
    fn drop(&mut self) {
        // Dropping a JoinHandle does not cancel the task.
        self.handle.abort();
    }
}

enum Input {
    Command(Option<UiCommand>),
    Submit(Option<SubmitEvent>),
    Poll(PollerEvent),
}

pub(crate) struct PipelineSession<B> {
    selection: SelectionState,
    store: TaskStore,
    active: ActiveSet,
    submitter: Submitter<B>,
    poller: Poller<B>,
    batch: Option<BatchCtx>,
    runs_requested: usize,
    event_tx: UnboundedSender<PipelineEvent>,
}

impl<B: PipelineBackend> PipelineSession<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        selection: SelectionState,
        poll_interval: Duration,
        event_tx: UnboundedSender<PipelineEvent>,
    ) -> Self {
        Self {
            selection,
            store: TaskStore::new(),
            active: ActiveSet::new(),
            submitter: Submitter::new(Arc::clone(&backend)),
            poller: Poller::new(backend, poll_interval),
            batch: None,
            runs_requested: 0,
            event_tx,
        }
    }

    fn emit(&self, ev: PipelineEvent) {
        let _ = self.event_tx.send(ev);
    }

    fn info(&self, info: InfoEvent) {
        self.emit(PipelineEvent::Info(info));
    }

    /// No batch in flight and nothing left to poll.
    pub(crate) fn is_idle(&self) -> bool {
        self.batch.is_none() && self.active.is_empty()
    }

    /// Apply one command. Returns `false` when the session should end.
    pub(crate) fn handle_command(&mut self, cmd: UiCommand) -> bool {
        match cmd {
            UiCommand::RunPipeline => {
                self.run_pipeline();
                true
            }
            UiCommand::Quit => false,
        }
    }

    /// Start a submission batch for the current selection.
    ///
    /// The batch runs in its own task so polling continues while it submits.
    pub(crate) fn run_pipeline(&mut self) {
        self.runs_requested += 1;

        if self.batch.is_some() {
            self.info(InfoEvent::BatchInProgress);
            return;
        }
        let mines = self.selection.selected_mines();
        if mines.is_empty() {
            self.info(InfoEvent::EmptySelection);
            return;
        }
        let range = self.selection.date_range().clone();
        if range.is_reversed() {
            warn!(start = %range.start_date, end = %range.end_date, "date range is reversed");
            self.info(InfoEvent::ReversedDateRange {
                date_range: range.clone(),
            });
        }

        info!(mines = ?mines, range = %range, "submitting pipeline batch");
        self.emit(PipelineEvent::BatchStarted {
            mines: mines.clone(),
            date_range: range.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let submitter = self.submitter.clone();
        let handle = tokio::spawn(async move { submitter.submit_batch(&mines, &range, &tx).await });
        self.batch = Some(BatchCtx { events: rx, handle });
    }

    pub(crate) fn apply_submit_event(&mut self, ev: SubmitEvent) {
        match ev {
            SubmitEvent::Outcome(outcome) => match outcome.result {
                Ok(task_id) => {
                    self.store.upsert(Task::queued(task_id.clone(), outcome.mine_id));
                    self.active.insert(task_id.clone());
                    self.emit(PipelineEvent::TaskSubmitted {
                        mine_id: outcome.mine_id,
                        task_id,
                    });
                    self.ensure_polling();
                }
                Err(e) => self.emit(PipelineEvent::SubmitFailed {
                    mine_id: outcome.mine_id,
                    error: e.to_string(),
                }),
            },
            SubmitEvent::Finished(report) => {
                self.batch = None;
                self.emit(PipelineEvent::BatchFinished {
                    submitted: report.submitted.len(),
                    failed: report.failed.len(),
                });
            }
        }
    }

    pub(crate) fn apply_poller_event(&mut self, ev: PollerEvent) {
        match ev {
            PollerEvent::Tick => {
                if self.active.is_empty() {
                    self.stop_polling();
                    return;
                }
                let issued = self.poller.issue(self.active.iter());
                debug!(issued, in_flight = self.poller.in_flight(), "status poll tick");
            }
            PollerEvent::Outcome(outcome) => self.apply_poll_outcome(outcome),
        }
    }

    fn apply_poll_outcome(&mut self, outcome: PollOutcome) {
        let PollOutcome {
            task_id,
            seq,
            result,
        } = outcome;

        match result {
            Ok(update) => match self.store.apply_status(seq, update) {
                ApplyOutcome::Applied(task) => {
                    debug!(task_id = %task.task_id, seq, status = %task.status, progress = task.progress, "task updated");
                    self.emit(PipelineEvent::TaskUpdated { task });
                }
                ApplyOutcome::Stale { last_seq } => {
                    debug!(task_id = %task_id, seq, last_seq, "discarding stale status response");
                }
                ApplyOutcome::UnknownTask => {
                    warn!(task_id = %task_id, "status response for untracked task");
                }
            },
            Err(e) => {
                // Record untouched; the next tick retries.
                warn!(task_id = %task_id, seq, error = %e, "status poll failed");
                self.emit(PipelineEvent::PollFailed {
                    task_id,
                    error: e.to_string(),
                });
            }
        }

        self.refresh_active();
    }

    /// Recompute the active set from the store and release the timer once it empties.
    fn refresh_active(&mut self) {
        for task_id in self.active.recompute(&self.store) {
            if let Some(task) = self.store.get(&task_id) {
                info!(task_id = %task_id, mine_id = task.mine_id, status = %task.status, "task finished");
            }
        }
        if self.active.is_empty() {
            self.stop_polling();
        }
    }

    fn ensure_polling(&mut self) {
        if !self.poller.is_running() && !self.active.is_empty() {
            self.poller.start();
            self.info(InfoEvent::PollingStarted {
                interval: self.poller.period(),
            });
        }
    }

    fn stop_polling(&mut self) {
        if self.poller.is_running() {
            self.poller.stop();
            self.info(InfoEvent::PollingStopped);
        }
    }

    async fn next_input(&mut self, cmd_rx: &mut UnboundedReceiver<UiCommand>) -> Input {
        let Self { batch, poller, .. } = self;

        tokio::select! {
            cmd = cmd_rx.recv() => Input::Command(cmd),
            ev = async {
                match batch.as_mut() {
                    Some(b) => b.events.recv().await,
                    None => futures::future::pending().await,
                }
            } => Input::Submit(ev),
            ev = poller.next_event() => Input::Poll(ev),
        }
    }

    /// Tear everything down and return the final snapshot.
    pub(crate) fn shutdown(mut self) -> BTreeMap<TaskId, Task> {
        self.poller.stop();
        self.batch = None;
        info!(tasks = self.store.len(), "pipeline session finished");
        let snapshot = self.store.get_all();
        self.emit(PipelineEvent::SessionCompleted {
            tasks: snapshot.values().cloned().collect(),
        });
        snapshot
    }
}

#[cfg(test)]
impl<B: PipelineBackend> PipelineSession<B> {
    pub(crate) fn selection_mut(&mut self) -> &mut SelectionState {
        &mut self.selection
    }

    pub(crate) fn store(&self) -> &TaskStore {
        &self.store
    }

    pub(crate) fn active(&self) -> &ActiveSet {
        &self.active
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub(crate) fn batch_running(&self) -> bool {
        self.batch.is_some()
    }
}

/// Drive a session until `Quit`, the command channel closes, or (with
/// `exit_when_idle`) every requested batch has been submitted and polled to the end.
pub(crate) async fn run_controller<B: PipelineBackend>(
    mut session: PipelineSession<B>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    exit_when_idle: bool,
) -> Result<BTreeMap<TaskId, Task>> {
    loop {
        match session.next_input(&mut cmd_rx).await {
            Input::Command(Some(cmd)) => {
                if !session.handle_command(cmd) {
                    break;
                }
            }
            Input::Command(None) => break,
            Input::Submit(Some(ev)) => session.apply_submit_event(ev),
            Input::Submit(None) => {
                // Sender dropped without a Finished message: the batch task died.
                warn!("submission batch ended unexpectedly");
                session.batch = None;
                session.info(InfoEvent::Message(
                    "Submission batch ended unexpectedly".into(),
                ));
            }
            Input::Poll(ev) => session.apply_poller_event(ev),
        }

        if exit_when_idle && session.runs_requested > 0 && session.is_idle() {
            break;
        }
    }

    Ok(session.shutdown())
}
