//! Application-level orchestration utilities.
//!
//! This module owns the pipeline session (selection, task store, submission and
//! polling) and the post-session report. CLI layers call into this module to keep
//! responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, PipelineSession, UiCommand};
pub(crate) use post_process::{process_session_completion, SessionReport, SubmitFailure};
