use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Remote task-queue endpoint and credentials.
///
/// Exactly one credential is attached to every outbound call: the bearer
/// token wins when both are configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            bearer_token: None,
            api_key: None,
        }
    }
}

/// Transport-level retry policy for the remote client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Poll cadence, timeout budgets, and the logical-retry budget for the
/// remote workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Budget when the request classifies as simple.
    #[serde(default = "default_simple_timeout_ms")]
    pub simple_timeout_ms: u64,
    /// Budget when the request classifies as complex.
    #[serde(default = "default_complex_timeout_ms")]
    pub complex_timeout_ms: u64,
    /// Outer retry budget for server-flagged retriable failures.
    #[serde(default = "default_logical_retries")]
    pub logical_retries: u32,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_simple_timeout_ms() -> u64 {
    60_000
}

fn default_complex_timeout_ms() -> u64 {
    300_000
}

fn default_logical_retries() -> u32 {
    3
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            simple_timeout_ms: default_simple_timeout_ms(),
            complex_timeout_ms: default_complex_timeout_ms(),
            logical_retries: default_logical_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.autopage/autopage.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Top-level configuration, constructed once and passed to the components
/// that need it. Components never read the environment themselves.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Environment-level backend override; takes precedence over request
    /// heuristics and (partially) over explicit per-request modes.
    #[serde(default)]
    pub force_remote: Option<bool>,
}

impl Config {
    /// Load configuration from a json5 file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = json5::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Load from the given path if it exists, otherwise defaults.
    /// Environment overrides are applied either way.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `AUTOPAGE_*` environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Same as [`apply_env`], with an injectable variable source.
    pub fn apply_env_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("AUTOPAGE_REMOTE_URL") {
            if !url.is_empty() {
                self.remote.base_url = url;
            }
        }
        if let Some(token) = get("AUTOPAGE_BEARER_TOKEN") {
            if !token.is_empty() {
                self.remote.bearer_token = Some(token);
            }
        }
        if let Some(key) = get("AUTOPAGE_API_KEY") {
            if !key.is_empty() {
                self.remote.api_key = Some(key);
            }
        }
        if let Some(raw) = get("AUTOPAGE_FORCE_REMOTE") {
            match parse_force_flag(&raw) {
                Some(v) => self.force_remote = Some(v),
                None => {
                    tracing::warn!(value = %raw, "Ignoring unrecognized AUTOPAGE_FORCE_REMOTE value")
                }
            }
        }
    }
}

/// Parse an env force-flag value: `true`/`1` and `false`/`0` (case-insensitive).
pub fn parse_force_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
