//! Safety net: approval policy in front of actions, checkpoints behind them.

mod approval;
mod checkpoint;

pub use approval::{ApprovalDenied, ApprovalGate, ApprovalMode, ConsolePrompter, Prompter, ScriptedPrompter};
pub use checkpoint::{CheckpointError, DEFAULT_TAG_PREFIX, GitCheckpointer, VersionControl};
