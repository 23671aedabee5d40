//! Collaborators around the loop: preflight before, hygiene and journal
//! after, and an optional task store throughout.

pub mod cleanup;
pub mod journal;
pub mod preflight;
pub mod store;

pub use cleanup::{CleanupReport, Hygiene, WorkspaceHygiene};
pub use journal::{Journal, JournalEntry};
pub use preflight::{CheckResult, Preflight, PreflightReport, WorkspacePreflight};
pub use store::{NullStore, SqliteTaskStore, StoreError, TaskMetrics, TaskRecord, TaskStore, ToolCallRecord};
