//! Item-oriented persistence, keyed `(user_id, key)` with type and tag
//! metadata. Everything above this talks to the [`ItemStore`] trait; SQLite
//! is the only concrete backend in-tree.

use autopage_core::{Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A stored item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub user_id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub tags: Vec<String>,
    pub content: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Parameters for writing an item.
pub struct PutParams {
    pub user_id: String,
    pub key: String,
    pub item_type: String,
    pub tags: Vec<String>,
    pub content: Value,
}

/// Structured filters for [`ItemStore::query`].
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub user_id: Option<String>,
    pub item_type: Option<String>,
    /// Any-match over item tags.
    pub tags: Option<Vec<String>>,
    pub limit: Option<usize>,
}

/// Injected store abstraction: the core stays testable without a live
/// process and portable to any persistence backend.
pub trait ItemStore: Send + Sync {
    fn get(&self, user_id: &str, key: &str) -> Result<Option<StoredItem>>;
    fn put(&self, params: PutParams) -> Result<StoredItem>;
    fn delete(&self, user_id: &str, key: &str) -> Result<bool>;
    fn query(&self, filter: &ItemFilter) -> Result<Vec<StoredItem>>;
    fn list_by_type(&self, item_type: &str) -> Result<Vec<StoredItem>>;
}

/// SQLite-backed item store.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open item db: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS items (
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'note',
                tags TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_items_type ON items(type);
            CREATE INDEX IF NOT EXISTS idx_items_user ON items(user_id);
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init item schema: {}", e)))?;

        debug!("Item store schema initialized");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredItem> {
        let tags_str: String = row.get("tags")?;
        let content_str: String = row.get("content")?;
        Ok(StoredItem {
            user_id: row.get("user_id")?,
            key: row.get("key")?,
            item_type: row.get("type")?,
            tags: if tags_str.is_empty() {
                vec![]
            } else {
                tags_str.split(',').map(|s| s.trim().to_string()).collect()
            },
            content: serde_json::from_str(&content_str).unwrap_or(Value::Null),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl ItemStore for SqliteStore {
    fn get(&self, user_id: &str, key: &str) -> Result<Option<StoredItem>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM items WHERE user_id = ?1 AND key = ?2",
            params![user_id, key],
            Self::row_to_item,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Get error: {}", e)))
    }

    fn put(&self, p: PutParams) -> Result<StoredItem> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let tags_str = p.tags.join(",");
        let content_str = serde_json::to_string(&p.content)?;

        conn.execute(
            "INSERT INTO items (user_id, key, type, tags, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id, key) DO UPDATE SET
                type = excluded.type,
                tags = excluded.tags,
                content = excluded.content,
                updated_at = excluded.updated_at",
            params![p.user_id, p.key, p.item_type, tags_str, content_str, now],
        )
        .map_err(|e| Error::Storage(format!("Put error: {}", e)))?;

        conn.query_row(
            "SELECT * FROM items WHERE user_id = ?1 AND key = ?2",
            params![p.user_id, p.key],
            Self::row_to_item,
        )
        .map_err(|e| Error::Storage(format!("Readback error: {}", e)))
    }

    fn delete(&self, user_id: &str, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "DELETE FROM items WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
            )
            .map_err(|e| Error::Storage(format!("Delete error: {}", e)))?;
        Ok(affected > 0)
    }

    fn query(&self, filter: &ItemFilter) -> Result<Vec<StoredItem>> {
        let conn = self.lock()?;

        let mut sql = "SELECT * FROM items WHERE 1=1".to_string();
        let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut bind_idx = 1;

        if let Some(ref user_id) = filter.user_id {
            sql.push_str(&format!(" AND user_id = ?{}", bind_idx));
            bind_values.push(Box::new(user_id.clone()));
            bind_idx += 1;
        }
        if let Some(ref item_type) = filter.item_type {
            sql.push_str(&format!(" AND type = ?{}", bind_idx));
            bind_values.push(Box::new(item_type.clone()));
            bind_idx += 1;
        }
        if let Some(ref tags) = filter.tags {
            if !tags.is_empty() {
                let conditions: Vec<String> = tags
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format!("tags LIKE '%' || ?{} || '%'", bind_idx + i))
                    .collect();
                sql.push_str(&format!(" AND ({})", conditions.join(" OR ")));
                for tag in tags {
                    bind_values.push(Box::new(tag.clone()));
                    bind_idx += 1;
                }
            }
        }
        let _ = bind_idx;

        sql.push_str(" ORDER BY updated_at DESC");
        sql.push_str(&format!(" LIMIT {}", filter.limit.unwrap_or(100)));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;
        let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
            bind_values.iter().map(|b| b.as_ref()).collect();

        let rows = stmt
            .query_map(bind_refs.as_slice(), Self::row_to_item)
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(|e| Error::Storage(format!("Row error: {}", e)))?);
        }
        Ok(items)
    }

    fn list_by_type(&self, item_type: &str) -> Result<Vec<StoredItem>> {
        self.query(&ItemFilter {
            item_type: Some(item_type.to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("items.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (store, _dir) = test_store();
        let item = store
            .put(PutParams {
                user_id: "u-1".to_string(),
                key: "procedure:checkout".to_string(),
                item_type: "procedure".to_string(),
                tags: vec!["user".to_string(), "checkout".to_string()],
                content: json!({ "versions": [] }),
            })
            .unwrap();
        assert_eq!(item.item_type, "procedure");

        let loaded = store.get("u-1", "procedure:checkout").unwrap().unwrap();
        assert_eq!(loaded.content, json!({ "versions": [] }));
        assert_eq!(loaded.tags, vec!["user", "checkout"]);
        assert!(store.get("u-2", "procedure:checkout").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites_in_place() {
        let (store, _dir) = test_store();
        let first = store
            .put(PutParams {
                user_id: "u-1".to_string(),
                key: "k".to_string(),
                item_type: "note".to_string(),
                tags: vec![],
                content: json!(1),
            })
            .unwrap();
        let second = store
            .put(PutParams {
                user_id: "u-1".to_string(),
                key: "k".to_string(),
                item_type: "note".to_string(),
                tags: vec![],
                content: json!(2),
            })
            .unwrap();
        assert_eq!(second.content, json!(2));
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn test_query_filters() {
        let (store, _dir) = test_store();
        for (user, key, item_type, tag) in [
            ("u-1", "a", "procedure", "checkout"),
            ("u-1", "b", "task_activity", "local"),
            ("u-2", "c", "procedure", "search"),
        ] {
            store
                .put(PutParams {
                    user_id: user.to_string(),
                    key: key.to_string(),
                    item_type: item_type.to_string(),
                    tags: vec![tag.to_string()],
                    content: json!({}),
                })
                .unwrap();
        }

        let procedures = store.list_by_type("procedure").unwrap();
        assert_eq!(procedures.len(), 2);

        let mine = store
            .query(&ItemFilter {
                user_id: Some("u-1".to_string()),
                item_type: Some("procedure".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].key, "a");

        let tagged = store
            .query(&ItemFilter {
                tags: Some(vec!["local".to_string()]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].key, "b");
    }

    #[test]
    fn test_delete() {
        let (store, _dir) = test_store();
        store
            .put(PutParams {
                user_id: "u-1".to_string(),
                key: "k".to_string(),
                item_type: "note".to_string(),
                tags: vec![],
                content: json!({}),
            })
            .unwrap();
        assert!(store.delete("u-1", "k").unwrap());
        assert!(!store.delete("u-1", "k").unwrap());
        assert!(store.get("u-1", "k").unwrap().is_none());
    }
}
