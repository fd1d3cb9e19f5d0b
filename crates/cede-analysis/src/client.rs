use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use cede_types::TaskStatus;

use crate::error::AnalysisError;

/// Environment variable naming the engine base URL.
pub const ENGINE_URL_ENV: &str = "CEDE_ENGINE_URL";

/// Connection settings for the external analysis engine.
///
/// The base URL is mandatory configuration; there is deliberately no
/// built-in deployment to fall back to.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
}

impl EngineConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var(ENGINE_URL_ENV)
            .map_err(|_| anyhow::anyhow!("{ENGINE_URL_ENV} is not set"))?;
        let trimmed = raw.trim();
        anyhow::ensure!(!trimmed.is_empty(), "{ENGINE_URL_ENV} is empty");
        Ok(Self::new(trimmed))
    }
}

/// Error body the engine attaches to non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    detail: Option<String>,
    #[allow(dead_code)]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

/// Thin typed client for the analysis engine. One request per call; retry
/// policy belongs to the poller, not here.
#[derive(Clone)]
pub struct EngineClient {
    base_url: String,
    client: Client,
}

impl EngineClient {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            base_url: config.base_url,
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Submit a document for analysis and return the engine-issued task id.
    pub async fn submit(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AnalysisError> {
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new().part("file", part);
        let url = format!("{}/submit-analysis", self.base_url);
        let response = self.client.post(&url).multipart(form).send().await?;
        let response = check(response).await?;
        let submitted: SubmitResponse = response.json().await?;
        Ok(submitted.task_id)
    }

    /// Fetch the current status snapshot for a task.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, AnalysisError> {
        let url = format!("{}/task-status/{}", self.base_url, task_id);
        let response = check(self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Fetch a completed task's payload directly. Used when a SUCCESS status
    /// arrives without an inline result.
    pub async fn task_result(&self, task_id: &str) -> Result<Value, AnalysisError> {
        let url = format!("{}/task-result/{}", self.base_url, task_id);
        let response = check(self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, AnalysisError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ApiErrorBody>()
        .await
        .ok()
        .and_then(|body| body.detail)
        .unwrap_or_else(|| format!("HTTP {status}"));
    Err(AnalysisError::Server {
        status: status.as_u16(),
        message,
    })
}

/// Source of task status snapshots. The poller and watcher only need this
/// one call, which keeps them independent of the concrete HTTP client.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, AnalysisError>;
}

#[async_trait]
impl StatusSource for EngineClient {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, AnalysisError> {
        EngineClient::task_status(self, task_id).await
    }
}
