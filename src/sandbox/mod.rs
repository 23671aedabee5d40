//! Execution sandbox
//!
//! The only path from the loop to the outside world. `FileJail` confines
//! file access to the workspace; `CommandGate` screens and time-boxes
//! shell commands run inside it.

mod gate;
mod jail;
pub mod patch;

pub use gate::{
    CommandGate, CommandResult, DEFAULT_DENYLIST, ExecutionRecord, GateConfig, SPAWN_FAILURE_EXIT_CODE,
    TIMEOUT_EXIT_CODE,
};
pub use jail::{FileJail, JailConfig, JailError, PatchMethod, SearchHit};

use std::path::PathBuf;

/// A path or command the sandbox refused. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("Path {path} escapes workspace {workspace}")]
    PathEscape { path: PathBuf, workspace: PathBuf },

    #[error("Path traversal rejected: {path}")]
    Traversal { path: PathBuf },

    #[error("Command blocked by denylist pattern '{pattern}': {command}")]
    DeniedCommand { command: String, pattern: String },
}
