//! Remote task-queue client: credentialed HTTP wrapper with transparent
//! bounded retry, plus the task event stream.

pub mod client;
pub mod events;
pub mod retry;

pub use client::{CreateMonitorRequest, CreateTaskRequest, Credential, Monitor, TaskClient};
pub use events::{TaskEvent, TaskEventStream};
pub use retry::RetryPolicy;
