//! Local driver seam. The browser itself lives behind [`PageDriver`]; the
//! core only walks compiled command sequences through it.

pub mod executor;

use async_trait::async_trait;
use autopage_core::Result;
use serde_json::Value;

pub use executor::{LocalExecutor, LocalOutcome};

/// Opaque handle to an open page, issued by [`PageDriver::open_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHandle(pub String);

/// Capability interface over the local browser automation driver. Every
/// operation returns a structured payload or raises on failure; the core
/// never reaches below this seam.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn open_page(&self, url: &str) -> Result<PageHandle>;

    async fn click(&self, page: &PageHandle, selector: &str) -> Result<Value>;

    async fn fill(&self, page: &PageHandle, selector: &str, value: &str) -> Result<Value>;

    async fn wait_for_selector(
        &self,
        page: &PageHandle,
        selector: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Value>;

    async fn wait_for_navigation(&self, page: &PageHandle, timeout_ms: Option<u64>)
        -> Result<Value>;

    async fn extract(
        &self,
        page: &PageHandle,
        selector: &str,
        as_name: &str,
        multiple: bool,
    ) -> Result<Value>;

    async fn screenshot(&self, page: &PageHandle) -> Result<Value>;
}
