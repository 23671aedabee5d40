//! Corral - a workspace-jailed, checkpointed tool loop for local coding agents
//!
//! A task runs as a bounded loop: the model proposes tool invocations, the
//! sandbox confines them to one workspace, an approval policy gates writes
//! and commands, and git checkpoints make every run undoable.

pub mod collab;
pub mod config;
pub mod error;
pub mod id;
pub mod llm;
pub mod redact;
pub mod runner;
pub mod safety;
pub mod sandbox;
pub mod state;
pub mod tools;

pub use error::{CorralError, Result};
