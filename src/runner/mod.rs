//! Orchestration loop.
//!
//! This module provides:
//! - TaskRunner, the init/plan/iterate/finalize/cleanup state machine
//! - Conversation, the owned message history of one task
//! - ToolHistory, which backs done-validation and stuck detection
//! - assemble, which wires a runner from configuration

mod agent_loop;
mod assemble;
mod conversation;
mod history;
pub mod prompts;

pub use agent_loop::{LoopSettings, RunCounters, StepError, Task, TaskOutcome, TaskRunner, TaskStatus};
pub use assemble::assemble;
pub use conversation::Conversation;
pub use history::{HistoryEntry, ToolHistory, signature};
