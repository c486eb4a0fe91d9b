pub mod config;
pub mod error;
pub mod trace;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use trace::{ExecutionTrace, StepTrace};
pub use types::{
    Artifact, DebugInfo, ExecutionMode, NormalizedResult, Task, TaskError, TaskOptions,
    TaskResult, TaskStatus, TaskType,
};
