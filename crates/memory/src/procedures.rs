//! Procedural memory: versioned, reusable step templates learned from
//! execution traces, plus the trace diff that turns a user correction into a
//! new version.

use autopage_core::trace::ExecutionTrace;
use autopage_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{ItemStore, PutParams};

/// Owner column used for records shared across users.
const SHARED_PROJECT_OWNER: &str = "_project";
const SHARED_GLOBAL_OWNER: &str = "_global";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureScope {
    User,
    Project,
    Global,
}

impl ProcedureScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureScope::User => "user",
            ProcedureScope::Project => "project",
            ProcedureScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureSource {
    Taught,
    Corrected,
    Imported,
}

/// One reusable step of a procedure, distilled from a trace step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepTemplate {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub inputs: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureVersion {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub source: ProcedureSource,
    pub steps: Vec<StepTemplate>,
}

/// Versioned procedure for one `(user, task key)`. `versions` is append-only
/// and ascending; `active_version` always names its last element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureRecord {
    pub task_key: String,
    pub user_id: String,
    pub scope: ProcedureScope,
    pub active_version: u32,
    pub versions: Vec<ProcedureVersion>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Modified,
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepChange {
    pub step_id: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

/// The diff between an agent-recorded trace and its user-corrected variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionPatch {
    pub task_key: String,
    pub user_id: String,
    pub changes: Vec<StepChange>,
}

pub fn patch_is_meaningful(patch: &CorrectionPatch) -> bool {
    !patch.changes.is_empty()
}

/// Canonical serialization for deep input comparison. `serde_json` maps are
/// key-ordered, so equal structures always serialize identically.
fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn steps_from_trace(trace: &ExecutionTrace) -> Vec<StepTemplate> {
    trace
        .steps
        .iter()
        .map(|step| StepTemplate {
            step_id: step.step_id.clone(),
            tool: step.tool.clone(),
            inputs: step.inputs.clone(),
        })
        .collect()
}

/// Version 1 of a procedure, taught by a successful execution.
pub fn build_procedure_from_execution(
    trace: &ExecutionTrace,
    created_by: &str,
    scope: ProcedureScope,
) -> ProcedureRecord {
    ProcedureRecord {
        task_key: trace.task_key.clone(),
        user_id: trace.user_id.clone(),
        scope,
        active_version: 1,
        versions: vec![ProcedureVersion {
            version: 1,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            source: ProcedureSource::Taught,
            steps: steps_from_trace(trace),
        }],
    }
}

/// Append the next version built from a new trace. Prior versions are never
/// touched.
pub fn add_version_from_execution(
    existing: &ProcedureRecord,
    trace: &ExecutionTrace,
    created_by: &str,
    source: ProcedureSource,
) -> ProcedureRecord {
    let mut record = existing.clone();
    let next = existing.active_version + 1;
    record.versions.push(ProcedureVersion {
        version: next,
        created_at: Utc::now(),
        created_by: created_by.to_string(),
        source,
        steps: steps_from_trace(trace),
    });
    record.active_version = next;
    record
}

/// Diff two traces step-by-step. Steps only in the agent trace come out
/// `removed`, steps in both with structurally different inputs `modified`
/// (agent-trace order for both), steps only in the user trace `added`
/// (user-trace order).
pub fn compute_correction_patch(
    agent_trace: &ExecutionTrace,
    user_trace: &ExecutionTrace,
) -> CorrectionPatch {
    let user_by_id: HashMap<&str, &autopage_core::trace::StepTrace> = user_trace
        .steps
        .iter()
        .map(|s| (s.step_id.as_str(), s))
        .collect();
    let agent_ids: HashSet<&str> = agent_trace
        .steps
        .iter()
        .map(|s| s.step_id.as_str())
        .collect();

    let mut changes = Vec::new();
    for step in &agent_trace.steps {
        match user_by_id.get(step.step_id.as_str()) {
            None => changes.push(StepChange {
                step_id: step.step_id.clone(),
                change_type: ChangeType::Removed,
                before: Some(step.inputs.clone()),
                after: None,
            }),
            Some(user_step) => {
                if canonical_json(&step.inputs) != canonical_json(&user_step.inputs) {
                    changes.push(StepChange {
                        step_id: step.step_id.clone(),
                        change_type: ChangeType::Modified,
                        before: Some(step.inputs.clone()),
                        after: Some(user_step.inputs.clone()),
                    });
                }
            }
        }
    }
    for step in &user_trace.steps {
        if !agent_ids.contains(step.step_id.as_str()) {
            changes.push(StepChange {
                step_id: step.step_id.clone(),
                change_type: ChangeType::Added,
                before: None,
                after: Some(step.inputs.clone()),
            });
        }
    }

    CorrectionPatch {
        task_key: user_trace.task_key.clone(),
        user_id: user_trace.user_id.clone(),
        changes,
    }
}

/// Persistence facade over the item store: scope-qualified keys, version-1
/// builds, corrected-version appends.
pub struct ProcedureStore {
    store: Arc<dyn ItemStore>,
}

impl ProcedureStore {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    /// `(owner, key)` under which a record lives. User-scoped records are
    /// namespaced per user; project/global records are shared.
    fn storage_coords(scope: ProcedureScope, user_id: &str, task_key: &str) -> (String, String) {
        let key = format!("procedure:{}", task_key);
        let owner = match scope {
            ProcedureScope::User => user_id.to_string(),
            ProcedureScope::Project => SHARED_PROJECT_OWNER.to_string(),
            ProcedureScope::Global => SHARED_GLOBAL_OWNER.to_string(),
        };
        (owner, key)
    }

    /// Load a record, or `None` when absent or structurally invalid.
    pub fn load_procedure(
        &self,
        user_id: &str,
        task_key: &str,
        scope: ProcedureScope,
    ) -> Result<Option<ProcedureRecord>> {
        let (owner, key) = Self::storage_coords(scope, user_id, task_key);
        let Some(item) = self.store.get(&owner, &key)? else {
            return Ok(None);
        };
        if item.content.get("versions").and_then(|v| v.as_array()).is_none() {
            warn!(task_key, owner = %owner, "Stored procedure record has no versions, ignoring");
            return Ok(None);
        }
        match serde_json::from_value::<ProcedureRecord>(item.content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(task_key, error = %e, "Stored procedure record is malformed, ignoring");
                Ok(None)
            }
        }
    }

    /// Persist a record. `expected_active` is the head version observed at
    /// read time (`None` for a fresh record); the write is rejected with a
    /// conflict when the stored head moved in between.
    pub fn persist(
        &self,
        record: &ProcedureRecord,
        expected_active: Option<u32>,
    ) -> Result<()> {
        let stored = self.load_procedure(&record.user_id, &record.task_key, record.scope)?;
        match (stored.map(|r| r.active_version), expected_active) {
            (Some(head), None) => {
                return Err(Error::Conflict(format!(
                    "procedure '{}' already exists at version {}",
                    record.task_key, head
                )));
            }
            (Some(head), Some(expected)) if head != expected => {
                return Err(Error::Conflict(format!(
                    "procedure '{}' moved from version {} to {} since read",
                    record.task_key, expected, head
                )));
            }
            (None, Some(expected)) => {
                return Err(Error::Conflict(format!(
                    "procedure '{}' disappeared (expected version {})",
                    record.task_key, expected
                )));
            }
            _ => {}
        }

        let (owner, key) = Self::storage_coords(record.scope, &record.user_id, &record.task_key);
        self.store.put(PutParams {
            user_id: owner,
            key,
            item_type: "procedure".to_string(),
            tags: vec![record.scope.as_str().to_string(), record.task_key.clone()],
            content: serde_json::to_value(record)?,
        })?;
        debug!(task_key = %record.task_key, version = record.active_version, "Procedure persisted");
        Ok(())
    }

    /// Fold a corrected trace into the store: fresh records start at version
    /// 1, existing ones get a `corrected` version appended. Concurrent
    /// corrections for the same key are serialized by the optimistic check
    /// in [`persist`](Self::persist).
    pub fn upsert_procedure_from_correction(
        &self,
        corrected_trace: &ExecutionTrace,
        created_by: &str,
        scope: ProcedureScope,
    ) -> Result<ProcedureRecord> {
        match self.load_procedure(&corrected_trace.user_id, &corrected_trace.task_key, scope)? {
            None => {
                let record = build_procedure_from_execution(corrected_trace, created_by, scope);
                self.persist(&record, None)?;
                Ok(record)
            }
            Some(existing) => {
                let record = add_version_from_execution(
                    &existing,
                    corrected_trace,
                    created_by,
                    ProcedureSource::Corrected,
                );
                self.persist(&record, Some(existing.active_version))?;
                Ok(record)
            }
        }
    }

    /// All stored procedures, across scopes.
    pub fn list_procedures(&self) -> Result<Vec<ProcedureRecord>> {
        let items = self.store.list_by_type("procedure")?;
        let mut records = Vec::new();
        for item in items {
            if let Ok(record) = serde_json::from_value::<ProcedureRecord>(item.content) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use autopage_core::trace::StepTrace;
    use serde_json::json;
    use tempfile::TempDir;

    fn step(step_id: &str, inputs: Value) -> StepTrace {
        StepTrace {
            step_id: step_id.to_string(),
            tool: Some("click".to_string()),
            inputs,
            outputs: json!({}),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        }
    }

    fn trace_with(task_key: &str, steps: Vec<StepTrace>) -> ExecutionTrace {
        let mut trace = ExecutionTrace::new(task_key, "u-1");
        for s in steps {
            trace.push_step(s);
        }
        trace.finish();
        trace
    }

    fn test_store() -> (ProcedureStore, Arc<SqliteStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let sqlite = Arc::new(SqliteStore::open(&dir.path().join("items.db")).unwrap());
        (ProcedureStore::new(sqlite.clone()), sqlite, dir)
    }

    #[test]
    fn test_identical_traces_yield_empty_patch() {
        let trace = trace_with(
            "checkout",
            vec![step("s1", json!({ "selector": "#buy" }))],
        );
        let patch = compute_correction_patch(&trace, &trace);
        assert!(patch.changes.is_empty());
        assert!(!patch_is_meaningful(&patch));
    }

    #[test]
    fn test_patch_kinds_and_ordering() {
        let agent = trace_with(
            "checkout",
            vec![
                step("s1", json!({ "selector": "#buy" })),
                step("s2", json!({ "selector": "#popup-close" })),
                step("s3", json!({ "selector": "#confirm" })),
            ],
        );
        let user = trace_with(
            "checkout",
            vec![
                step("s1", json!({ "selector": "#buy-now" })),
                step("s3", json!({ "selector": "#confirm" })),
                step("s4", json!({ "selector": "#receipt" })),
            ],
        );

        let patch = compute_correction_patch(&agent, &user);
        assert!(patch_is_meaningful(&patch));

        let kinds: Vec<(&str, ChangeType)> = patch
            .changes
            .iter()
            .map(|c| (c.step_id.as_str(), c.change_type))
            .collect();
        // removed/modified in agent order, then added in user order
        assert_eq!(
            kinds,
            vec![
                ("s1", ChangeType::Modified),
                ("s2", ChangeType::Removed),
                ("s4", ChangeType::Added),
            ]
        );

        assert_eq!(patch.changes[0].before, Some(json!({ "selector": "#buy" })));
        assert_eq!(patch.changes[0].after, Some(json!({ "selector": "#buy-now" })));
        assert_eq!(patch.changes[1].after, None);
        assert_eq!(patch.changes[2].before, None);
    }

    #[test]
    fn test_build_version_one() {
        let trace = trace_with("search", vec![step("s1", json!({ "url": "https://x" }))]);
        let record = build_procedure_from_execution(&trace, "agent", ProcedureScope::User);
        assert_eq!(record.active_version, 1);
        assert_eq!(record.versions.len(), 1);
        assert_eq!(record.versions[0].source, ProcedureSource::Taught);
        assert_eq!(record.versions[0].steps.len(), 1);
    }

    #[test]
    fn test_add_version_appends_without_mutation() {
        let v1_trace = trace_with("search", vec![step("s1", json!({ "a": 1 }))]);
        let v2_trace = trace_with("search", vec![step("s1", json!({ "a": 2 }))]);
        let v3_trace = trace_with("search", vec![step("s1", json!({ "a": 3 }))]);

        let record = build_procedure_from_execution(&v1_trace, "agent", ProcedureScope::User);
        let record = add_version_from_execution(&record, &v2_trace, "agent", ProcedureSource::Corrected);
        assert_eq!(record.active_version, 2);

        let before: Vec<String> = record.versions[..2]
            .iter()
            .map(|v| serde_json::to_string(v).unwrap())
            .collect();

        let updated =
            add_version_from_execution(&record, &v3_trace, "user", ProcedureSource::Corrected);
        assert_eq!(updated.active_version, 3);
        assert_eq!(updated.versions.len(), record.versions.len() + 1);

        let after: Vec<String> = updated.versions[..2]
            .iter()
            .map(|v| serde_json::to_string(v).unwrap())
            .collect();
        // prior versions byte-identical
        assert_eq!(before, after);
        assert_eq!(updated.versions.last().unwrap().version, 3);
    }

    #[test]
    fn test_load_rejects_structurally_invalid_records() {
        let (procedures, sqlite, _dir) = test_store();
        use crate::store::ItemStore;
        sqlite
            .put(crate::store::PutParams {
                user_id: "u-1".to_string(),
                key: "procedure:broken".to_string(),
                item_type: "procedure".to_string(),
                tags: vec![],
                content: json!({ "taskKey": "broken" }),
            })
            .unwrap();

        let loaded = procedures
            .load_procedure("u-1", "broken", ProcedureScope::User)
            .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_scope_namespacing() {
        let (procedures, _sqlite, _dir) = test_store();
        let trace = trace_with("checkout", vec![step("s1", json!({}))]);

        procedures
            .upsert_procedure_from_correction(&trace, "agent", ProcedureScope::User)
            .unwrap();

        // user scope is namespaced per user
        assert!(procedures
            .load_procedure("u-1", "checkout", ProcedureScope::User)
            .unwrap()
            .is_some());
        assert!(procedures
            .load_procedure("u-2", "checkout", ProcedureScope::User)
            .unwrap()
            .is_none());

        // global scope is shared
        procedures
            .upsert_procedure_from_correction(&trace, "agent", ProcedureScope::Global)
            .unwrap();
        assert!(procedures
            .load_procedure("u-2", "checkout", ProcedureScope::Global)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_upsert_builds_then_appends() {
        let (procedures, _sqlite, _dir) = test_store();
        let trace = trace_with("checkout", vec![step("s1", json!({ "a": 1 }))]);

        let first = procedures
            .upsert_procedure_from_correction(&trace, "agent", ProcedureScope::User)
            .unwrap();
        assert_eq!(first.active_version, 1);
        assert_eq!(first.versions[0].source, ProcedureSource::Taught);

        let corrected = trace_with("checkout", vec![step("s1", json!({ "a": 2 }))]);
        let second = procedures
            .upsert_procedure_from_correction(&corrected, "user", ProcedureScope::User)
            .unwrap();
        assert_eq!(second.active_version, 2);
        assert_eq!(second.versions[1].source, ProcedureSource::Corrected);
        assert_eq!(second.versions[1].steps[0].inputs, json!({ "a": 2 }));
    }

    #[test]
    fn test_stale_write_is_rejected() {
        let (procedures, _sqlite, _dir) = test_store();
        let trace = trace_with("checkout", vec![step("s1", json!({}))]);

        let existing = procedures
            .upsert_procedure_from_correction(&trace, "agent", ProcedureScope::User)
            .unwrap();

        // build an append against the head we just read
        let stale =
            add_version_from_execution(&existing, &trace, "user", ProcedureSource::Corrected);

        // another correction lands first
        procedures
            .upsert_procedure_from_correction(&trace, "other", ProcedureScope::User)
            .unwrap();

        let err = procedures
            .persist(&stale, Some(existing.active_version))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_fresh_write_conflicts_with_existing_record() {
        let (procedures, _sqlite, _dir) = test_store();
        let trace = trace_with("checkout", vec![step("s1", json!({}))]);
        procedures
            .upsert_procedure_from_correction(&trace, "agent", ProcedureScope::User)
            .unwrap();

        let fresh = build_procedure_from_execution(&trace, "agent", ProcedureScope::User);
        let err = procedures.persist(&fresh, None).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
