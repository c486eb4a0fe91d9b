use std::time::Duration;

use autopage_core::config::RetryConfig;
use autopage_core::{Error, Result};
use rand::Rng;

/// Jitter added on top of every backoff delay, drawn uniformly per attempt.
const JITTER_MS: u64 = 100;

/// Bounded exponential backoff for the transport layer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Delay before the retry following `attempt` (1-based):
    /// `base * 2^(attempt-1) + jitter`, jitter uniform in `[0, 100ms)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exp = self.base_delay.saturating_mul(1u32 << shift);
        let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
        exp + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Map a reqwest failure to the transport taxonomy. Failures without a
/// response (connect errors, connect timeouts) classify retriable.
pub fn classify_request_error(err: reqwest::Error) -> Error {
    if let Some(status) = err.status() {
        return Error::http(status.as_u16(), err.to_string());
    }
    Error::network(err.to_string())
}

/// Turn a non-success response into a transport error carrying its status.
pub async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Error::http(status, snippet)
}

/// Check a response status, passing successes through.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_with_bounded_jitter() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        for (attempt, floor_ms) in [(1u32, 100u64), (2, 200), (3, 400), (4, 800)] {
            let delay = policy.backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(floor_ms), "attempt {}", attempt);
            assert!(
                delay < Duration::from_millis(floor_ms + JITTER_MS),
                "attempt {}",
                attempt
            );
        }
    }

    #[test]
    fn test_jitter_varies() {
        let policy = RetryPolicy::default();
        let draws: Vec<Duration> = (0..32).map(|_| policy.backoff_delay(1)).collect();
        let first = draws[0];
        // uniform draws over 100ms collide 32 times with negligible probability
        assert!(draws.iter().any(|d| *d != first));
    }
}
