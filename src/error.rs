//! Error types for Corral
//!
//! Centralized error handling using thiserror. Subsystems keep their own
//! typed errors (`Violation`, `ApprovalDenied`, `ToolError`, `LlmError`)
//! and convert into `CorralError` at assembly seams.

use thiserror::Error;

use crate::collab::store::StoreError;
use crate::llm::LlmError;
use crate::safety::{ApprovalDenied, CheckpointError};
use crate::sandbox::Violation;
use crate::tools::RegistryError;

/// All error types that can occur while assembling or driving a task
#[derive(Debug, Error)]
pub enum CorralError {
    /// Configuration could not be loaded or failed validation
    #[error("Config error: {0}")]
    Config(String),

    /// Workspace is missing or unusable
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Path or command rejected by the sandbox
    #[error(transparent)]
    Violation(#[from] Violation),

    /// A human declined a plan, mutation, or command
    #[error(transparent)]
    Denied(#[from] ApprovalDenied),

    /// Tool registration collided
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Version-control checkpoint operation failed
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Model service failure
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Preflight reported the workspace not ready
    #[error("Preflight failed: {0}")]
    Preflight(String),

    /// Task store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Corral operations
pub type Result<T> = std::result::Result<T, CorralError>;
