//! Backend API surface used by the pipeline.
//!
//! The submitter and poller only talk to [`PipelineBackend`], so tests can swap in
//! scripted backends while the CLI uses [`HttpBackend`].

mod http;

pub use http::HttpBackend;

use crate::model::{DateRange, MineId, StatusResponse, SubmitResponse};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, timeout, or a body that could not be read.
    #[error("{endpoint}: request failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint}: backend returned HTTP {status}{}", body_suffix(.body))]
    Status {
        endpoint: String,
        status: u16,
        body: Option<String>,
    },
    /// The response parsed as HTTP success but did not carry the expected fields.
    #[error("{endpoint}: malformed response: {reason}")]
    Malformed { endpoint: String, reason: String },
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(b) => format!(" ({})", b.trim()),
        None => String::new(),
    }
}

impl BackendError {
    pub fn malformed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Malformed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}

/// Operations the mine-analysis backend exposes under `/admin`, `/mine` and `/health`.
pub trait PipelineBackend: Send + Sync + 'static {
    /// `POST /admin/submit`: queue a job and return immediately with its task id.
    fn submit(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> impl Future<Output = Result<SubmitResponse, BackendError>> + Send;

    /// `GET /admin/status/{task_id}`.
    fn status(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<StatusResponse, BackendError>> + Send;

    /// `POST /admin/run`: legacy variant that blocks until the pipeline finishes.
    fn run_sync(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> impl Future<Output = Result<serde_json::Value, BackendError>> + Send;

    /// `GET /health`.
    fn health(&self) -> impl Future<Output = Result<serde_json::Value, BackendError>> + Send;

    /// `GET /mine/kpi/{mine_id}`: KPI summary of the data a finished job wrote for
    /// the window.
    fn kpi(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> impl Future<Output = Result<serde_json::Value, BackendError>> + Send;
}
