use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// HTTP status code, if a response was received at all.
        status: Option<u16>,
    },

    #[error("Workflow timeout: {0}")]
    WorkflowTimeout(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a transport error from an HTTP status and body snippet.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Build a transport error for a request that got no response at all
    /// (connection refused, DNS failure, connect timeout).
    pub fn network(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Whether the transport-retry layer may retry after this error.
    ///
    /// Network-level failures (no response) and HTTP 5xx/429 are retriable;
    /// every other status is not, and non-transport errors never are.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transport { status: None, .. } => true,
            Error::Transport {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
