//! Remote workflow runner: create → poll → fetch → normalize, with the
//! workflow-timeout budget and the outer logical-retry loop.

use std::time::Duration;

use autopage_client::{CreateTaskRequest, TaskClient};
use autopage_core::config::WorkflowConfig;
use autopage_core::types::{DebugInfo, NormalizedResult, Task, TaskError, TaskResult, TaskStatus};
use autopage_core::Error;
use tracing::{info, warn};

pub struct RemoteWorkflow<'a> {
    client: &'a TaskClient,
    config: &'a WorkflowConfig,
}

impl<'a> RemoteWorkflow<'a> {
    pub fn new(client: &'a TaskClient, config: &'a WorkflowConfig) -> Self {
        Self { client, config }
    }

    /// Run the remote workflow to a normalized result. Transport retries are
    /// already absorbed below this layer; here only server-flagged retriable
    /// failures are retried, each time with a fresh task, up to the logical
    /// budget. Errors come back as data, never as Err.
    pub async fn run(&self, request: &CreateTaskRequest, budget: Duration) -> NormalizedResult {
        let max_attempts = self.config.logical_retries.max(1);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let (mut normalized, logically_retriable) = self.run_once(request, budget).await;
            normalized.debug.attempts = attempts;
            if logically_retriable && attempts < max_attempts {
                warn!(
                    attempts,
                    max_attempts, "Remote task failed with a retriable error, starting a fresh task"
                );
                continue;
            }
            return normalized;
        }
    }

    /// One pass: create the task, poll until terminal or budget exhaustion,
    /// fetch the result. The second tuple element flags a terminal `failed`
    /// whose error the server marked retriable.
    async fn run_once(
        &self,
        request: &CreateTaskRequest,
        budget: Duration,
    ) -> (NormalizedResult, bool) {
        let deadline = tokio::time::Instant::now() + budget;
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        // Fresh idempotency key per attempt; the budget rides along so the
        // backend enforces a matching guardrail.
        let mut request = request.clone().with_idempotency_key();
        request.options.max_duration_ms = Some(budget.as_millis() as u64);

        let mut task = match self.client.create_task(&request).await {
            Ok(task) => task,
            Err(e) => return (transport_failure(e), false),
        };
        info!(task_id = %task.id, status = %task.status, "Remote task created");

        // Poll until terminal; the budget is checked once per iteration and
        // exhausting it is a workflow fault, not a network error. The result
        // endpoint is never consulted after the budget runs out.
        while !task.status.is_terminal() {
            if tokio::time::Instant::now() >= deadline {
                warn!(task_id = %task.id, budget_ms = budget.as_millis() as u64, "Workflow budget exceeded while polling");
                return (
                    NormalizedResult::timed_out(
                        format!("workflow budget of {}ms exceeded", budget.as_millis()),
                        0,
                    ),
                    false,
                );
            }
            tokio::time::sleep(interval).await;
            task = match self.client.get_task(&task.id).await {
                Ok(task) => task,
                Err(e) => return (transport_failure(e), false),
            };
        }

        let result = match self.client.get_result(&task.id).await {
            Ok(result) => result,
            Err(e) => return (transport_failure(e), false),
        };

        let logically_retriable = task.status == TaskStatus::Failed
            && result.error.as_ref().map(|e| e.retriable).unwrap_or(false);
        (normalize_remote(&task, result), logically_retriable)
    }
}

/// Project a terminal Task + TaskResult pair into the common result shape.
pub fn normalize_remote(task: &Task, result: TaskResult) -> NormalizedResult {
    NormalizedResult {
        status: task.status,
        output: result.data,
        artifacts: if result.artifacts.is_empty() {
            None
        } else {
            Some(result.artifacts)
        },
        error: result.error.or_else(|| task.error.clone()),
        debug: DebugInfo {
            attempts: 0,
            logs: if result.logs.is_empty() {
                None
            } else {
                Some(result.logs)
            },
        },
    }
}

/// A transport failure that survived the retry layer, surfaced as data.
fn transport_failure(error: Error) -> NormalizedResult {
    NormalizedResult {
        status: TaskStatus::Failed,
        output: None,
        artifacts: None,
        error: Some(TaskError::new(
            "transport_error",
            error.to_string(),
            error.is_retriable(),
        )),
        debug: DebugInfo::default(),
    }
}
