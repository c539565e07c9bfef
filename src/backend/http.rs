use super::{BackendError, PipelineBackend};
use crate::model::{DateRange, MineId, RunConfig, StatusResponse, SubmitResponse};
use anyhow::{Context, Result};
use reqwest::Url;
use serde::de::DeserializeOwned;

/// reqwest-backed client for the mine-analysis API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let base_url = Url::parse(&cfg.api_url)
            .with_context(|| format!("invalid API base URL: {}", cfg.api_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {}", cfg.api_url);
        }

        let mut builder = reqwest::Client::builder().user_agent(cfg.user_agent.clone());
        // No per-request timeout unless asked for; the poll interval drives retries.
        if let Some(timeout) = cfg.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build HTTP client")?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, keeping any prefix it already has.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn job_url(&self, segments: &[&str], mine_id: MineId, range: &DateRange) -> Url {
        let mut url = self.endpoint(segments);
        url.query_pairs_mut()
            .append_pair("mine_id", &mine_id.to_string())
            .append_pair("start_date", &range.start_date)
            .append_pair("end_date", &range.end_date);
        url
    }
}

/// Turn a response into `T`, mapping non-2xx statuses and undecodable bodies to errors.
async fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<T, BackendError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.ok().filter(|b| !b.trim().is_empty());
        return Err(BackendError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    let bytes = resp.bytes().await.map_err(|source| BackendError::Transport {
        endpoint: endpoint.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::malformed(endpoint, e.to_string()))
}

fn transport(endpoint: &str) -> impl FnOnce(reqwest::Error) -> BackendError + '_ {
    move |source| BackendError::Transport {
        endpoint: endpoint.to_string(),
        source,
    }
}

impl PipelineBackend for HttpBackend {
    async fn submit(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> Result<SubmitResponse, BackendError> {
        let endpoint = "POST /admin/submit";
        let url = self.job_url(&["admin", "submit"], mine_id, range);
        let resp = self
            .http
            .post(url)
            .send()
            .await
            .map_err(transport(endpoint))?;
        read_json(endpoint, resp).await
    }

    async fn status(&self, task_id: &str) -> Result<StatusResponse, BackendError> {
        let endpoint = format!("GET /admin/status/{task_id}");
        let url = self.endpoint(&["admin", "status", task_id]);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(transport(&endpoint))?;
        read_json(&endpoint, resp).await
    }

    async fn run_sync(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> Result<serde_json::Value, BackendError> {
        let endpoint = "POST /admin/run";
        let url = self.job_url(&["admin", "run"], mine_id, range);
        let resp = self
            .http
            .post(url)
            .send()
            .await
            .map_err(transport(endpoint))?;
        read_json(endpoint, resp).await
    }

    async fn health(&self) -> Result<serde_json::Value, BackendError> {
        let endpoint = "GET /health";
        let resp = self
            .http
            .get(self.endpoint(&["health"]))
            .send()
            .await
            .map_err(transport(endpoint))?;
        read_json(endpoint, resp).await
    }

    async fn kpi(
        &self,
        mine_id: MineId,
        range: &DateRange,
    ) -> Result<serde_json::Value, BackendError> {
        let endpoint = format!("GET /mine/kpi/{mine_id}");
        let mut url = self.endpoint(&["mine", "kpi", &mine_id.to_string()]);
        url.query_pairs_mut()
            .append_pair("start", &range.start_date)
            .append_pair("end", &range.end_date);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(transport(&endpoint))?;
        read_json(&endpoint, resp).await
    }
}
