//! Persistence: the injected item-store abstraction, procedural memory, and
//! the task-activity log.

pub mod activity;
pub mod procedures;
pub mod store;

pub use activity::ActivityLog;
pub use procedures::{
    add_version_from_execution, build_procedure_from_execution, compute_correction_patch,
    patch_is_meaningful, ChangeType, CorrectionPatch, ProcedureRecord, ProcedureScope,
    ProcedureSource, ProcedureStore, ProcedureVersion, StepChange, StepTemplate,
};
pub use store::{ItemFilter, ItemStore, PutParams, SqliteStore, StoredItem};
