//! Runs a compiled command sequence against a [`PageDriver`], recording
//! per-step logs and an execution trace.

use autopage_core::trace::{ExecutionTrace, StepTrace};
use autopage_core::types::{TaskError, TaskStatus};
use autopage_core::{Error, Result};
use autopage_dsl::Command;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::{PageDriver, PageHandle};

/// What one local run produced. Normalized by the engine exactly like a
/// remote outcome.
#[derive(Debug)]
pub struct LocalOutcome {
    pub status: TaskStatus,
    pub data: Value,
    pub logs: Vec<String>,
    pub error: Option<TaskError>,
    pub trace: ExecutionTrace,
}

pub struct LocalExecutor {
    driver: Arc<dyn PageDriver>,
}

impl LocalExecutor {
    pub fn new(driver: Arc<dyn PageDriver>) -> Self {
        Self { driver }
    }

    /// Execute the sequence, stopping at the first failing step. Extracted
    /// values accumulate into the outcome data keyed by their `as` name.
    pub async fn run(&self, commands: &[Command], task_key: &str, user_id: &str) -> LocalOutcome {
        let mut trace = ExecutionTrace::new(task_key, user_id);
        let mut logs = Vec::new();
        let mut extracted = Map::new();
        let mut page: Option<PageHandle> = None;

        for (index, command) in commands.iter().enumerate() {
            let step_id = format!("step-{}", index + 1);
            let started_at = Utc::now();
            let inputs = json!({ "operation": command.operation(), "args": command.args() });

            match self.run_command(command, &mut page).await {
                Ok(output) => {
                    debug!(step = %step_id, operation = command.operation(), "Local step completed");
                    logs.push(format!("{}: {} ok", step_id, command.operation()));
                    if let Command::Extract { as_name, .. } = command {
                        extracted.insert(as_name.clone(), output.clone());
                    }
                    trace.push_step(StepTrace {
                        step_id,
                        tool: Some(command.operation().to_string()),
                        inputs,
                        outputs: output,
                        started_at,
                        finished_at: Some(Utc::now()),
                    });
                }
                Err(e) => {
                    logs.push(format!("{}: {} failed: {}", step_id, command.operation(), e));
                    trace.push_step(StepTrace {
                        step_id,
                        tool: Some(command.operation().to_string()),
                        inputs,
                        outputs: json!({ "error": e.to_string() }),
                        started_at,
                        finished_at: Some(Utc::now()),
                    });
                    trace.finish();
                    return LocalOutcome {
                        status: TaskStatus::Failed,
                        data: Value::Object(extracted),
                        logs,
                        error: Some(TaskError::new("driver_error", e.to_string(), false)),
                        trace,
                    };
                }
            }
        }

        trace.finish();
        LocalOutcome {
            status: TaskStatus::Completed,
            data: Value::Object(extracted),
            logs,
            error: None,
            trace,
        }
    }

    async fn run_command(
        &self,
        command: &Command,
        page: &mut Option<PageHandle>,
    ) -> Result<Value> {
        if let Command::Goto { url, .. } = command {
            let handle = self.driver.open_page(url).await?;
            let output = json!({ "page": handle.0 });
            *page = Some(handle);
            return Ok(output);
        }

        let current = page.as_ref().ok_or_else(|| {
            Error::Driver("no open page; the script must start with goto".to_string())
        })?;

        match command {
            Command::Goto { .. } => unreachable!("handled above"),
            Command::Click { selector, .. } => self.driver.click(current, selector).await,
            Command::Fill { selector, value } => self.driver.fill(current, selector, value).await,
            Command::WaitForSelector {
                selector,
                timeout_ms,
            } => {
                self.driver
                    .wait_for_selector(current, selector, *timeout_ms)
                    .await
            }
            Command::WaitForNavigation { timeout_ms } => {
                self.driver.wait_for_navigation(current, *timeout_ms).await
            }
            Command::Extract {
                selector,
                as_name,
                multiple,
            } => {
                self.driver
                    .extract(current, selector, as_name, *multiple)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted driver: succeeds everywhere except selectors listed as bad.
    struct ScriptedDriver {
        bad_selectors: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedDriver {
        fn ok() -> Self {
            Self {
                bad_selectors: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_on(selector: &str) -> Self {
            Self {
                bad_selectors: vec![selector.to_string()],
                calls: AtomicUsize::new(0),
            }
        }

        fn check(&self, selector: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.bad_selectors.iter().any(|s| s == selector) {
                Err(Error::Driver(format!("selector not found: {}", selector)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedDriver {
        async fn open_page(&self, url: &str) -> Result<PageHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PageHandle(format!("page:{}", url)))
        }

        async fn click(&self, _page: &PageHandle, selector: &str) -> Result<Value> {
            self.check(selector)?;
            Ok(json!({ "clicked": selector }))
        }

        async fn fill(&self, _page: &PageHandle, selector: &str, value: &str) -> Result<Value> {
            self.check(selector)?;
            Ok(json!({ "filled": selector, "value": value }))
        }

        async fn wait_for_selector(
            &self,
            _page: &PageHandle,
            selector: &str,
            _timeout_ms: Option<u64>,
        ) -> Result<Value> {
            self.check(selector)?;
            Ok(json!({ "found": selector }))
        }

        async fn wait_for_navigation(
            &self,
            _page: &PageHandle,
            _timeout_ms: Option<u64>,
        ) -> Result<Value> {
            Ok(json!({ "navigated": true }))
        }

        async fn extract(
            &self,
            _page: &PageHandle,
            selector: &str,
            _as_name: &str,
            multiple: bool,
        ) -> Result<Value> {
            self.check(selector)?;
            if multiple {
                Ok(json!(["a", "b"]))
            } else {
                Ok(json!("a"))
            }
        }

        async fn screenshot(&self, _page: &PageHandle) -> Result<Value> {
            Ok(json!({ "screenshot": "png" }))
        }
    }

    fn script(text: &str) -> Vec<Command> {
        autopage_dsl::compile_from_text(text).unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_collects_extracts_and_trace() {
        let executor = LocalExecutor::new(Arc::new(ScriptedDriver::ok()));
        let commands = script(
            "goto https://example.com\nfill #q rust async\nclick #go\nextract .title titles multiple",
        );
        let outcome = executor.run(&commands, "search", "u-1").await;

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.data["titles"], json!(["a", "b"]));
        assert_eq!(outcome.trace.steps.len(), 4);
        assert!(outcome.trace.finished_at.is_some());
        assert_eq!(outcome.trace.steps[0].step_id, "step-1");
        assert_eq!(
            outcome.trace.steps[1].inputs["args"]["value"],
            json!("rust async")
        );
    }

    #[tokio::test]
    async fn test_failure_stops_the_sequence() {
        let driver = Arc::new(ScriptedDriver::failing_on("#missing"));
        let executor = LocalExecutor::new(driver.clone());
        let commands = script("goto https://example.com\nclick #missing\nclick #never");
        let outcome = executor.run(&commands, "search", "u-1").await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.error.as_ref().unwrap().message.contains("#missing"));
        // goto + failing click recorded, third command never attempted
        assert_eq!(outcome.trace.steps.len(), 2);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_page_required_before_interaction() {
        let executor = LocalExecutor::new(Arc::new(ScriptedDriver::ok()));
        let outcome = executor.run(&script("click #go"), "search", "u-1").await;
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.error.unwrap().message.contains("goto"));
    }
}
