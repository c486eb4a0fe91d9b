//! Backend selection and the single-fallback execution protocol.

use std::sync::Arc;
use std::time::Duration;

use autopage_client::{CreateTaskRequest, RetryPolicy, TaskClient};
use autopage_core::trace::ExecutionTrace;
use autopage_core::types::{DebugInfo, ExecutionMode, NormalizedResult, TaskType};
use autopage_core::{Config, Error};
use autopage_driver::{LocalExecutor, PageDriver};
use autopage_dsl::Command;
use serde_json::Value;
use tracing::{info, warn};

use crate::runner::RemoteWorkflow;

/// Raw script payload carried on a request, compiled before any backend call.
#[derive(Debug, Clone)]
pub enum ScriptSource {
    Structured(Value),
    Text(String),
}

/// One execution request against the orchestrator.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub task_key: String,
    pub user_id: String,
    pub instructions: Option<String>,
    pub targets: Vec<String>,
    pub script: Option<ScriptSource>,
    pub mode: Option<ExecutionMode>,
    /// Explicit workflow-budget override in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl ExecRequest {
    pub fn new(task_key: &str, user_id: &str) -> Self {
        Self {
            task_key: task_key.to_string(),
            user_id: user_id.to_string(),
            instructions: None,
            targets: Vec::new(),
            script: None,
            mode: None,
            timeout_ms: None,
        }
    }
}

/// Normalized result plus the trace of whichever backend actually ran the
/// steps (local runs only; the remote backend keeps its own traces).
#[derive(Debug)]
pub struct Execution {
    pub result: NormalizedResult,
    pub trace: Option<ExecutionTrace>,
}

impl Execution {
    fn bare(result: NormalizedResult) -> Self {
        Self {
            result,
            trace: None,
        }
    }
}

/// Backend preference. The env-level force flag outranks heuristics and
/// partially outranks explicit modes: `true` forces remote unless the mode is
/// explicitly simple, `false` forces local unless the mode is explicitly
/// complex.
pub fn prefer_remote(
    mode: Option<ExecutionMode>,
    force_remote: Option<bool>,
    command_count: usize,
    target_count: usize,
    instruction_len: usize,
) -> bool {
    match (force_remote, mode) {
        (Some(true), Some(ExecutionMode::Simple)) => false,
        (Some(true), _) => true,
        (Some(false), Some(ExecutionMode::Complex)) => true,
        (Some(false), _) => false,
        (None, Some(ExecutionMode::Complex)) => true,
        (None, Some(ExecutionMode::Simple)) => false,
        (None, None) => command_count > 5 || target_count > 3 || instruction_len > 500,
    }
}

pub struct Orchestrator {
    client: TaskClient,
    driver: Option<Arc<dyn PageDriver>>,
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let client = TaskClient::new(&config.remote, RetryPolicy::from_config(&config.retry));
        Self {
            client,
            driver: None,
            config,
        }
    }

    /// Attach a local driver; without one every request runs remotely.
    pub fn with_driver(mut self, driver: Arc<dyn PageDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn client(&self) -> &TaskClient {
        &self.client
    }

    /// Execute one request. No backend path is attempted more than twice in
    /// total (one primary plus one fallback); failures come back as data.
    pub async fn execute(&self, request: ExecRequest) -> Execution {
        // Compile before anything touches a backend.
        let commands = match &request.script {
            Some(source) => match compile_script(source) {
                Ok(commands) => Some(commands),
                Err(e) => {
                    warn!(error = %e, task_key = %request.task_key, "Script rejected at compile time");
                    return Execution::bare(NormalizedResult::failed(
                        compile_error_code(&e),
                        e.to_string(),
                        0,
                    ));
                }
            },
            None => None,
        };

        let command_count = commands.as_ref().map(|c| c.len()).unwrap_or(0);
        let instruction_len = request
            .instructions
            .as_ref()
            .map(|i| i.chars().count())
            .unwrap_or(0);
        let remote_preferred = prefer_remote(
            request.mode,
            self.config.force_remote,
            command_count,
            request.targets.len(),
            instruction_len,
        );
        let budget = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| {
                // Complexity classifies by the same decision as the backend
                // preference.
                Duration::from_millis(if remote_preferred {
                    self.config.workflow.complex_timeout_ms
                } else {
                    self.config.workflow.simple_timeout_ms
                })
            });

        let runner = RemoteWorkflow::new(&self.client, &self.config.workflow);
        let create_request = build_create_request(&request, commands.as_deref());

        if remote_preferred {
            let result = runner.run(&create_request, budget).await;
            if result.is_failure() {
                if let (Some(commands), Some(driver)) = (&commands, &self.driver) {
                    info!(
                        task_key = %request.task_key,
                        status = %result.status,
                        "Remote execution failed, falling back to the local driver"
                    );
                    return self
                        .run_local(driver.clone(), commands, &request, budget, result.debug.attempts)
                        .await;
                }
            }
            return Execution::bare(result);
        }

        match (&commands, &self.driver) {
            (Some(commands), Some(driver)) => {
                let local = self
                    .run_local(driver.clone(), commands, &request, budget, 0)
                    .await;
                if local.result.is_failure() {
                    info!(
                        task_key = %request.task_key,
                        status = %local.result.status,
                        "Local execution failed, falling back to the remote backend"
                    );
                    let result = runner.run(&create_request, budget).await;
                    return Execution {
                        result,
                        trace: local.trace,
                    };
                }
                local
            }
            // Freeform instructions (or no driver attached) cannot run
            // locally; the remote backend is the only path and its result
            // returns as-is, even on failure.
            _ => Execution::bare(runner.run(&create_request, budget).await),
        }
    }

    async fn run_local(
        &self,
        driver: Arc<dyn PageDriver>,
        commands: &[Command],
        request: &ExecRequest,
        budget: Duration,
        prior_attempts: u32,
    ) -> Execution {
        let executor = LocalExecutor::new(driver);

        let outcome = match tokio::time::timeout(
            budget,
            executor.run(commands, &request.task_key, &request.user_id),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(task_key = %request.task_key, budget_ms = budget.as_millis() as u64, "Local execution exceeded the workflow budget");
                return Execution::bare(NormalizedResult::timed_out(
                    format!("workflow budget of {}ms exceeded", budget.as_millis()),
                    prior_attempts + 1,
                ));
            }
        };

        let result = NormalizedResult {
            status: outcome.status,
            output: Some(outcome.data),
            artifacts: None,
            error: outcome.error,
            debug: DebugInfo {
                attempts: prior_attempts + 1,
                logs: Some(outcome.logs),
            },
        };
        Execution {
            result,
            trace: Some(outcome.trace),
        }
    }
}

fn compile_script(source: &ScriptSource) -> autopage_core::Result<Vec<Command>> {
    match source {
        ScriptSource::Structured(raw) => autopage_dsl::compile_from_structured(raw),
        ScriptSource::Text(text) => autopage_dsl::compile_from_text(text),
    }
}

fn compile_error_code(error: &Error) -> &'static str {
    match error {
        Error::UnsupportedCommand(_) => "unsupported_command",
        _ => "invalid_script",
    }
}

fn build_create_request(request: &ExecRequest, commands: Option<&[Command]>) -> CreateTaskRequest {
    let mut create = match commands {
        Some(commands) => CreateTaskRequest::dsl(commands),
        None => CreateTaskRequest::freeform(request.instructions.as_deref().unwrap_or_default()),
    };
    if create.task_type == TaskType::Dsl {
        create.instructions = request.instructions.clone();
    }
    if !request.targets.is_empty() {
        create.targets = Some(request.targets.clone());
    }
    create.mode = request.mode;
    create
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristics_without_overrides() {
        // small request stays local
        assert!(!prefer_remote(None, None, 3, 1, 100));
        // any one dimension over its threshold goes remote
        assert!(prefer_remote(None, None, 6, 0, 0));
        assert!(prefer_remote(None, None, 0, 4, 0));
        assert!(prefer_remote(None, None, 0, 0, 501));
        // boundary values stay local
        assert!(!prefer_remote(None, None, 5, 3, 500));
    }

    #[test]
    fn test_explicit_mode_wins_over_heuristics() {
        assert!(prefer_remote(Some(ExecutionMode::Complex), None, 1, 0, 0));
        assert!(!prefer_remote(Some(ExecutionMode::Simple), None, 20, 10, 2000));
    }

    #[test]
    fn test_force_flag_precedence() {
        // force-remote beats heuristics and an absent mode
        assert!(prefer_remote(None, Some(true), 1, 0, 0));
        // ...but an explicitly simple mode still wins
        assert!(!prefer_remote(Some(ExecutionMode::Simple), Some(true), 1, 0, 0));
        // force-local beats heuristics
        assert!(!prefer_remote(None, Some(false), 20, 10, 2000));
        // ...but an explicitly complex mode still wins
        assert!(prefer_remote(Some(ExecutionMode::Complex), Some(false), 1, 0, 0));
    }
}
