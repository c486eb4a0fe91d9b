//! Task-activity log: every finished execution leaves an item in the store,
//! tagged by backend and terminal status.

use autopage_core::types::NormalizedResult;
use autopage_core::Result;
use serde_json::json;
use std::sync::Arc;

use crate::store::{ItemFilter, ItemStore, PutParams, StoredItem};

const ACTIVITY_TYPE: &str = "task_activity";

pub struct ActivityLog {
    store: Arc<dyn ItemStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    /// Record one finished execution.
    pub fn record_execution(
        &self,
        user_id: &str,
        task_key: &str,
        backend: &str,
        result: &NormalizedResult,
    ) -> Result<StoredItem> {
        let key = format!("activity:{}:{}", task_key, uuid::Uuid::new_v4());
        self.store.put(PutParams {
            user_id: user_id.to_string(),
            key,
            item_type: ACTIVITY_TYPE.to_string(),
            tags: vec![backend.to_string(), result.status.to_string()],
            content: json!({
                "taskKey": task_key,
                "backend": backend,
                "status": result.status,
                "attempts": result.debug.attempts,
                "error": &result.error,
            }),
        })
    }

    /// Most recent activity entries for one user.
    pub fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<StoredItem>> {
        self.store.query(&ItemFilter {
            user_id: Some(user_id.to_string()),
            item_type: Some(ACTIVITY_TYPE.to_string()),
            tags: None,
            limit: Some(limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use autopage_core::types::{NormalizedResult, TaskStatus};
    use tempfile::TempDir;

    #[test]
    fn test_record_and_list_activity() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("items.db")).unwrap());
        let log = ActivityLog::new(store);

        let result = NormalizedResult::failed("driver_error", "selector not found", 1);
        log.record_execution("u-1", "checkout", "local", &result)
            .unwrap();

        let ok = NormalizedResult {
            status: TaskStatus::Completed,
            output: None,
            artifacts: None,
            error: None,
            debug: Default::default(),
        };
        log.record_execution("u-1", "checkout", "remote", &ok)
            .unwrap();

        let entries = log.recent("u-1", 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.tags.contains(&"local".to_string())));
        assert!(log.recent("u-2", 10).unwrap().is_empty());
    }
}
