//! git tool - read-only repository views plus model-requested checkpoints
//!
//! Rollback is absent: undo belongs to the loop. A checkpoint commits the
//! tree, so it goes through command approval.

use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ActionEffect, ActionSpec, Proposal, Tool, ToolError, ToolOutcome, optional_str, optional_u64};
use crate::safety::{CheckpointError, GitCheckpointer, VersionControl};

const MAX_DIFF_CHARS: usize = 20_000;
const DEFAULT_LOG_COUNT: usize = 10;
const DEFAULT_CHECKPOINT_MESSAGE: &str = "checkpoint requested by agent";

pub struct GitTool {
    git: Arc<GitCheckpointer>,
}

impl GitTool {
    pub fn new(git: Arc<GitCheckpointer>) -> Self {
        Self { git }
    }

    fn require_repo(&self) -> Result<(), ToolError> {
        if self.git.is_repo() {
            Ok(())
        } else {
            Err(ToolError::Precondition("workspace is not a git repository".to_string()))
        }
    }
}

impl From<CheckpointError> for ToolError {
    fn from(e: CheckpointError) -> Self {
        ToolError::Failed(e.to_string())
    }
}

fn cap(text: String) -> (String, bool) {
    if text.chars().count() <= MAX_DIFF_CHARS {
        return (text, false);
    }
    let mut head: String = text.chars().take(MAX_DIFF_CHARS).collect();
    head.push_str("\n... [truncated]");
    (head, true)
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &'static str {
        "git"
    }

    fn description(&self) -> &'static str {
        "Git status, diff, log and checkpoint operations"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new(
                "git_status",
                "Show changed files (short status)",
                ActionEffect::Observe,
                json!({"type": "object", "properties": {}}),
            ),
            ActionSpec::new(
                "git_diff",
                "Show uncommitted changes: a summary, or the full diff of one path",
                ActionEffect::Observe,
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Limit to one file and show the full diff"}
                    }
                }),
            ),
            ActionSpec::new(
                "git_log",
                "Show recent commits, one line each",
                ActionEffect::Observe,
                json!({
                    "type": "object",
                    "properties": {
                        "n": {"type": "integer", "description": "Number of commits, default 10"}
                    }
                }),
            ),
            ActionSpec::new(
                "git_checkpoint",
                "Commit the current state and tag it as a checkpoint",
                ActionEffect::Execute,
                json!({
                    "type": "object",
                    "properties": {
                        "message": {"type": "string", "description": "Checkpoint message"}
                    }
                }),
            ),
        ]
    }

    async fn propose(&self, action: &str, args: &Value) -> Result<Option<Proposal>, ToolError> {
        match action {
            "git_checkpoint" => {
                let message = optional_str(args, "message").unwrap_or(DEFAULT_CHECKPOINT_MESSAGE);
                Ok(Some(Proposal::Command(format!(
                    "git add -A && git commit -m {:?} && git tag <checkpoint>",
                    message
                ))))
            }
            _ => Ok(None),
        }
    }

    async fn execute(&self, action: &str, args: &Value) -> Result<ToolOutcome, ToolError> {
        match action {
            "git_status" => {
                self.require_repo()?;
                let status = self.git.status_short()?;
                let clean = status.trim().is_empty();
                Ok(ToolOutcome::success(json!({ "status": status, "clean": clean })))
            }
            "git_diff" => {
                self.require_repo()?;
                let (diff, truncated) = match optional_str(args, "path") {
                    Some(path) => cap(self.git.diff(Some(path))?),
                    None => cap(self.git.diff_stat()?),
                };
                Ok(ToolOutcome::success(json!({ "diff": diff, "truncated": truncated })))
            }
            "git_log" => {
                self.require_repo()?;
                let n = optional_u64(args, "n").map(|n| n as usize).unwrap_or(DEFAULT_LOG_COUNT);
                Ok(ToolOutcome::success(json!({ "log": self.git.log_oneline(n)? })))
            }
            "git_checkpoint" => {
                let message = optional_str(args, "message").unwrap_or(DEFAULT_CHECKPOINT_MESSAGE);
                let tag = self.git.checkpoint(message)?;
                Ok(ToolOutcome::success(json!({ "tag": tag })))
            }
            other => Err(ToolError::InvalidArgs(format!("Unknown git action: {}", other))),
        }
    }

    async fn verify(&self) -> ToolOutcome {
        match Command::new("git").arg("--version").output() {
            Ok(out) if out.status.success() => ToolOutcome::success(json!({
                "tool": "git",
                "version": String::from_utf8_lossy(&out.stdout).trim(),
                "is_repo": self.git.is_repo(),
            })),
            Ok(out) => ToolOutcome::failure(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            Err(e) => ToolOutcome::failure(format!("git not available: {}", e)),
        }
    }
}
