//! HTTP client for the answer service and its paper-details proxy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::ApiError;
use crate::models::{CorpusId, CreatedTask, PaperMetadata, StatusResponse, TaskStatus};
use crate::progress::{self, Kind};

const TASK_ENDPOINT: &str = "/api/query_open_scholar";
const PAPER_DETAILS_ENDPOINT: &str = "/api/paper_details";

/// Creates tasks and reports on their progress.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn create_task(&self, query: &str) -> Result<CreatedTask, ApiError>;
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ApiError>;
}

/// Batched bibliographic lookup keyed by corpus id.
#[async_trait]
pub trait PaperLookup: Send + Sync {
    async fn paper_details(
        &self,
        corpus_ids: &[CorpusId],
        fields: &[String],
    ) -> Result<Vec<PaperMetadata>, ApiError>;
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest<'a> {
    query: &'a str,
    opt_in: bool,
    feedback_toggle: bool,
}

#[derive(Debug, Serialize)]
struct StatusRequest<'a> {
    task_id: &'a str,
    feedback_toggle: bool,
}

#[derive(Debug, Serialize)]
struct PaperDetailsRequest<'a> {
    corpus_ids: &'a [CorpusId],
    fields: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

/// Pulls the human-readable `detail` out of an error body, if there is one.
fn parse_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Maps non-2xx responses to [`ApiError`]; passes successes through.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = parse_detail(&body);
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound { detail });
    }
    Err(ApiError::Http {
        status: status.as_u16(),
        detail,
    })
}

pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
    feedback_toggle: bool,
    opt_in: bool,
}

impl BackendClient {
    pub fn with_config(config: &BackendConfig) -> Self {
        BackendClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            feedback_toggle: config.feedback_toggle,
            opt_in: config.opt_in,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: serde::de::DeserializeOwned,
    {
        let url = self.url(endpoint);
        debug!(%url, "POST");
        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl TaskBackend for BackendClient {
    async fn create_task(&self, query: &str) -> Result<CreatedTask, ApiError> {
        let request = CreateTaskRequest {
            query,
            opt_in: self.opt_in,
            feedback_toggle: self.feedback_toggle,
        };
        let created: CreatedTask = self.post_json(TASK_ENDPOINT, &request).await?;
        progress::log_with(Kind::Http, format!("created task {}", created.task_id));
        Ok(created)
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ApiError> {
        let request = StatusRequest {
            task_id,
            feedback_toggle: self.feedback_toggle,
        };
        let response: StatusResponse = self.post_json(TASK_ENDPOINT, &request).await?;
        Ok(TaskStatus::from(response))
    }
}

#[async_trait]
impl PaperLookup for BackendClient {
    async fn paper_details(
        &self,
        corpus_ids: &[CorpusId],
        fields: &[String],
    ) -> Result<Vec<PaperMetadata>, ApiError> {
        let request = PaperDetailsRequest { corpus_ids, fields };
        // Unknown ids come back as `null` entries.
        let papers: Vec<Option<PaperMetadata>> =
            self.post_json(PAPER_DETAILS_ENDPOINT, &request).await?;
        let found: Vec<PaperMetadata> = papers.into_iter().flatten().collect();
        if found.len() < corpus_ids.len() {
            warn!(requested = corpus_ids.len(), found = found.len(), "paper details incomplete");
        }
        progress::log_with(
            Kind::Http,
            format!("paper details: {}/{}", found.len(), corpus_ids.len()),
        );
        Ok(found)
    }
}
