use autopage_core::config::RemoteConfig;
use autopage_core::types::{Artifact, ExecutionMode, Task, TaskOptions, TaskResult, TaskType};
use autopage_core::Result;
use autopage_dsl::{commands_to_wire, Command};
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::events::TaskEventStream;
use crate::retry::{check_response, classify_request_error, RetryPolicy};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credential attached to every outbound call. Bearer wins when both forms
/// are configured.
#[derive(Debug, Clone)]
pub enum Credential {
    Bearer(String),
    ApiKey(String),
}

impl Credential {
    pub fn from_config(remote: &RemoteConfig) -> Option<Self> {
        if let Some(token) = remote.bearer_token.as_deref() {
            if !token.is_empty() {
                return Some(Credential::Bearer(token.to_string()));
            }
        }
        if let Some(key) = remote.api_key.as_deref() {
            if !key.is_empty() {
                return Some(Credential::ApiKey(key.to_string()));
            }
        }
        None
    }

    fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::Bearer(token) => req.header("Authorization", format!("Bearer {}", token)),
            Credential::ApiKey(key) => req.header("X-API-Key", key),
        }
    }
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsl_commands: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(default)]
    pub options: TaskOptions,
}

impl CreateTaskRequest {
    pub fn dsl(commands: &[Command]) -> Self {
        Self {
            task_type: TaskType::Dsl,
            instructions: None,
            targets: None,
            dsl_commands: Some(commands_to_wire(commands)),
            mode: None,
            options: TaskOptions::default(),
        }
    }

    pub fn freeform(instructions: &str) -> Self {
        Self {
            task_type: TaskType::Freeform,
            instructions: Some(instructions.to_string()),
            targets: None,
            dsl_commands: None,
            mode: None,
            options: TaskOptions::default(),
        }
    }

    /// Stamp a fresh idempotency key, as done for every created task.
    pub fn with_idempotency_key(mut self) -> Self {
        self.options.idempotency_key = Some(uuid::Uuid::new_v4().to_string());
        self
    }
}

/// Recurring-task registration (not part of the core execution path).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub schedule: String,
    pub request: CreateTaskRequest,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonitorRequest {
    pub schedule: String,
    pub request: CreateTaskRequest,
}

/// Stateless wrapper around the task-queue HTTP API. Transport retries are
/// absorbed here and invisible to callers.
#[derive(Clone)]
pub struct TaskClient {
    http: reqwest::Client,
    base_url: String,
    credential: Option<Credential>,
    retry: RetryPolicy,
}

impl TaskClient {
    pub fn new(remote: &RemoteConfig, retry: RetryPolicy) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using default");
                reqwest::Client::new()
            });
        Self {
            http,
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            credential: Credential::from_config(remote),
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(cred) = &self.credential {
            req = cred.apply(req);
        }
        req
    }

    /// Send one logical request, retrying retriable transport failures with
    /// exponential backoff until the attempt budget runs out.
    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut req = self.build(method.clone(), path);
            if let Some(b) = body {
                req = req.json(b);
            }
            let outcome = match req.send().await {
                Ok(resp) => check_response(resp).await,
                Err(e) => Err(classify_request_error(e)),
            };
            match outcome {
                Ok(resp) => {
                    if attempt > 1 {
                        debug!(attempt, path, "Request succeeded after retry");
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    if !e.is_retriable() || attempt >= self.retry.max_retries {
                        return Err(e);
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        path,
                        "Retriable transport error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// `POST /tasks` — returns the created task (202).
    pub async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task> {
        let body = serde_json::to_value(request)?;
        let resp = self
            .send_with_retry(Method::POST, "/tasks", Some(&body))
            .await?;
        Ok(resp.json().await.map_err(classify_request_error)?)
    }

    /// `GET /tasks/{id}` — current task state.
    pub async fn get_task(&self, id: &str) -> Result<Task> {
        let resp = self
            .send_with_retry(Method::GET, &format!("/tasks/{}", id), None)
            .await?;
        Ok(resp.json().await.map_err(classify_request_error)?)
    }

    /// `GET /tasks/{id}/result` — result payload (may be a partial shell
    /// before the task is terminal).
    pub async fn get_result(&self, id: &str) -> Result<TaskResult> {
        let resp = self
            .send_with_retry(Method::GET, &format!("/tasks/{}/result", id), None)
            .await?;
        Ok(resp.json().await.map_err(classify_request_error)?)
    }

    /// `POST /tasks/{id}/cancel` — a terminal-state conflict surfaces as a
    /// non-retriable transport error.
    pub async fn cancel_task(&self, id: &str) -> Result<Task> {
        let resp = self
            .send_with_retry(Method::POST, &format!("/tasks/{}/cancel", id), None)
            .await?;
        Ok(resp.json().await.map_err(classify_request_error)?)
    }

    /// `GET /tasks/{id}/events` — live event stream, usable instead of
    /// polling. The stream is finite and single-subscriber.
    pub async fn events(&self, id: &str) -> Result<TaskEventStream> {
        let req = self
            .build(Method::GET, &format!("/tasks/{}/events", id))
            .header("Accept", "text/event-stream");
        let resp = match req.send().await {
            Ok(r) => check_response(r).await?,
            Err(e) => return Err(classify_request_error(e)),
        };
        Ok(TaskEventStream::new(resp))
    }

    /// `POST /monitors`
    pub async fn create_monitor(&self, request: &CreateMonitorRequest) -> Result<Monitor> {
        let body = serde_json::to_value(request)?;
        let resp = self
            .send_with_retry(Method::POST, "/monitors", Some(&body))
            .await?;
        Ok(resp.json().await.map_err(classify_request_error)?)
    }

    /// `GET /monitors`
    pub async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let resp = self.send_with_retry(Method::GET, "/monitors", None).await?;
        Ok(resp.json().await.map_err(classify_request_error)?)
    }

    /// `DELETE /monitors/{id}`
    pub async fn delete_monitor(&self, id: &str) -> Result<()> {
        self.send_with_retry(Method::DELETE, &format!("/monitors/{}", id), None)
            .await?;
        Ok(())
    }

    /// `GET /artifacts/{id}` — artifact metadata.
    pub async fn get_artifact(&self, id: &str) -> Result<Artifact> {
        let resp = self
            .send_with_retry(Method::GET, &format!("/artifacts/{}", id), None)
            .await?;
        Ok(resp.json().await.map_err(classify_request_error)?)
    }
}
