//! Job submission, status polling and KPI read-back against the pipeline backend.

mod legacy;
mod poller;
mod readback;
mod submitter;

#[cfg(test)]
pub(crate) mod testing;

pub use legacy::run_sync_batch;
pub use poller::{PollOutcome, Poller, PollerEvent};
pub use readback::{fetch_completed_kpis, MineKpi};
pub use submitter::{BatchReport, SubmitEvent, Submitter};
