//! Task event stream: a single-subscriber, finite sequence of typed events
//! read off the `GET /tasks/{id}/events` SSE endpoint. The stream ends at
//! the first `end` event or terminal status and is not restartable.

use autopage_core::types::{Task, TaskResult};
use autopage_core::{Error, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum TaskEvent {
    Status(Task),
    Result(TaskResult),
    End,
}

pub struct TaskEventStream {
    response: reqwest::Response,
    partial: String,
    event_name: String,
    event_data: String,
    done: bool,
}

impl TaskEventStream {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            partial: String::new(),
            event_name: String::new(),
            event_data: String::new(),
            done: false,
        }
    }

    /// Next event, or `None` once the stream has terminated.
    pub async fn next(&mut self) -> Result<Option<TaskEvent>> {
        if self.done {
            return Ok(None);
        }

        loop {
            // Drain complete lines already buffered before pulling more.
            while let Some(pos) = self.partial.find('\n') {
                let line = self.partial[..pos].trim_end_matches('\r').to_string();
                self.partial.drain(..=pos);
                if let Some(event) = self.feed_line(&line)? {
                    return Ok(Some(event));
                }
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => {
                    self.partial.push_str(&String::from_utf8_lossy(&bytes));
                }
                Ok(None) => {
                    self.done = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.done = true;
                    return Err(Error::network(e.to_string()));
                }
            }
        }
    }

    /// Process one SSE line; a blank line dispatches the pending event.
    fn feed_line(&mut self, line: &str) -> Result<Option<TaskEvent>> {
        if let Some(name) = line.strip_prefix("event:") {
            self.event_name = name.trim().to_string();
            return Ok(None);
        }
        if let Some(data) = line.strip_prefix("data:") {
            if !self.event_data.is_empty() {
                self.event_data.push('\n');
            }
            self.event_data.push_str(data.trim_start());
            return Ok(None);
        }
        if !line.is_empty() {
            return Ok(None);
        }

        // dispatch boundary
        let name = std::mem::take(&mut self.event_name);
        let data = std::mem::take(&mut self.event_data);
        match name.as_str() {
            "status" => {
                let task: Task = serde_json::from_str(&data)?;
                if task.status.is_terminal() {
                    debug!(task_id = %task.id, status = %task.status, "Event stream reached terminal status");
                    self.done = true;
                }
                Ok(Some(TaskEvent::Status(task)))
            }
            "result" => {
                let result: TaskResult = serde_json::from_str(&data)?;
                Ok(Some(TaskEvent::Result(result)))
            }
            "end" => {
                self.done = true;
                Ok(Some(TaskEvent::End))
            }
            "" => Ok(None),
            other => {
                warn!(event = %other, "Ignoring unknown task event");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopage_core::config::RemoteConfig;
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;

    fn task_event(status: &str) -> String {
        format!(
            "event: status\ndata: {{\"id\":\"t-1\",\"status\":\"{}\",\"createdAt\":\"{}\",\"updatedAt\":\"{}\",\"taskType\":\"dsl\",\"options\":{{}}}}\n\n",
            status,
            Utc::now().to_rfc3339(),
            Utc::now().to_rfc3339(),
        )
    }

    async fn stream_for(body: String) -> TaskEventStream {
        let app = Router::new().route(
            "/tasks/:id/events",
            get(move || {
                let body = body.clone();
                async move {
                    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let remote = RemoteConfig {
            base_url: format!("http://{}", addr),
            bearer_token: None,
            api_key: None,
        };
        let client = crate::TaskClient::new(&remote, crate::RetryPolicy::default());
        client.events("t-1").await.unwrap()
    }

    #[tokio::test]
    async fn test_stream_ends_at_terminal_status() {
        let body = format!(
            "{}{}{}",
            task_event("queued"),
            task_event("running"),
            task_event("completed"),
        );
        let mut stream = stream_for(body).await;

        let mut statuses = Vec::new();
        while let Some(event) = stream.next().await.unwrap() {
            if let TaskEvent::Status(task) = event {
                statuses.push(task.status.to_string());
            }
        }
        assert_eq!(statuses, vec!["queued", "running", "completed"]);
        // terminated; further polls stay empty
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_at_end_event() {
        let body = format!(
            "{}event: result\ndata: {{\"taskId\":\"t-1\",\"status\":\"running\",\"logs\":[],\"artifacts\":[]}}\n\nevent: end\ndata: {{}}\n\n{}",
            task_event("running"),
            task_event("running"),
        );
        let mut stream = stream_for(body).await;

        let mut seen = Vec::new();
        while let Some(event) = stream.next().await.unwrap() {
            seen.push(match event {
                TaskEvent::Status(_) => "status",
                TaskEvent::Result(_) => "result",
                TaskEvent::End => "end",
            });
        }
        // nothing after `end` is delivered
        assert_eq!(seen, vec!["status", "result", "end"]);
    }
}
