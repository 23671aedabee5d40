//! shell tool - run a command through the command gate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ActionEffect, ActionSpec, Proposal, Tool, ToolError, ToolOutcome, optional_str, optional_u64};
use crate::redact::redact;
use crate::sandbox::{CommandGate, CommandResult};

pub struct ShellTool {
    gate: Arc<CommandGate>,
}

impl ShellTool {
    pub fn new(gate: Arc<CommandGate>) -> Self {
        Self { gate }
    }
}

/// `command`, or the legacy `cmd` alias
fn command_arg(args: &Value) -> Result<&str, ToolError> {
    optional_str(args, "command")
        .or_else(|| optional_str(args, "cmd"))
        .ok_or_else(|| ToolError::InvalidArgs("'command' is required and must be a string".to_string()))
}

/// Model-facing outcome for a finished command, output redacted
pub(crate) fn command_outcome(result: &CommandResult) -> ToolOutcome {
    let data = json!({
        "command": redact(&result.command),
        "exit_code": result.exit_code,
        "stdout": redact(&result.stdout),
        "stderr": redact(&result.stderr),
        "duration_secs": (result.duration_secs * 100.0).round() / 100.0,
        "truncated": result.truncated,
        "timed_out": result.timed_out,
    });
    if result.success() {
        ToolOutcome::success(data)
    } else if result.timed_out {
        ToolOutcome::failed_with(data, redact(&result.stderr))
    } else {
        ToolOutcome::failed_with(data, format!("Command exited with code {}", result.exit_code))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "Run shell commands inside the workspace with a timeout"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec::new(
            "run_command",
            "Execute a shell command in the workspace directory",
            ActionEffect::Execute,
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command line"},
                    "timeout_secs": {"type": "integer", "description": "Optional timeout override in seconds"}
                },
                "required": ["command"]
            }),
        )]
    }

    async fn propose(&self, action: &str, args: &Value) -> Result<Option<Proposal>, ToolError> {
        match action {
            "run_command" => {
                let command = command_arg(args)?;
                self.gate.check(command)?;
                Ok(Some(Proposal::Command(command.to_string())))
            }
            _ => Ok(None),
        }
    }

    async fn execute(&self, action: &str, args: &Value) -> Result<ToolOutcome, ToolError> {
        if action != "run_command" {
            return Err(ToolError::InvalidArgs(format!("Unknown shell action: {}", action)));
        }
        let command = command_arg(args)?;
        let result = match optional_u64(args, "timeout_secs").filter(|t| *t > 0) {
            Some(secs) => {
                self.gate
                    .run_with_timeout(command, None, Duration::from_secs(secs))
                    .await?
            }
            None => self.gate.run(command, None).await?,
        };
        Ok(command_outcome(&result))
    }

    async fn verify(&self) -> ToolOutcome {
        match self.gate.run_with_timeout("true", None, Duration::from_secs(5)).await {
            Ok(result) if result.success() => ToolOutcome::success(json!({ "tool": "shell", "status": "available" })),
            Ok(result) => ToolOutcome::failure(format!("shell self-check exited with {}", result.exit_code)),
            Err(v) => ToolOutcome::failure(v.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::GateConfig;
    use tempfile::tempdir;

    fn tool(dir: &tempfile::TempDir) -> (ShellTool, Arc<CommandGate>) {
        let gate = Arc::new(CommandGate::new(dir.path(), GateConfig::default()));
        (ShellTool::new(gate.clone()), gate)
    }

    #[tokio::test]
    async fn test_run_command_success() {
        let dir = tempdir().unwrap();
        let (shell, _) = tool(&dir);
        let outcome = shell.execute("run_command", &json!({"command": "echo hi"})).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.get("stdout"), Some(&json!("hi\n")));
    }

    #[tokio::test]
    async fn test_cmd_alias_and_failure() {
        let dir = tempdir().unwrap();
        let (shell, _) = tool(&dir);
        let outcome = shell.execute("run_command", &json!({"cmd": "exit 3"})).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.get("exit_code"), Some(&json!(3)));
        assert_eq!(outcome.error.as_deref(), Some("Command exited with code 3"));
    }

    #[tokio::test]
    async fn test_denied_command_is_violation_and_not_recorded() {
        let dir = tempdir().unwrap();
        let (shell, gate) = tool(&dir);
        let err = shell
            .execute("run_command", &json!({"command": "rm -rf /"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Violation(_)));
        assert!(gate.history().is_empty());
    }

    #[tokio::test]
    async fn test_output_is_redacted() {
        let dir = tempdir().unwrap();
        let (shell, _) = tool(&dir);
        let outcome = shell
            .execute("run_command", &json!({"command": "echo api_key=supersecretvalue"}))
            .await
            .unwrap();
        let stdout = outcome.get("stdout").and_then(|v| v.as_str()).unwrap();
        assert!(!stdout.contains("supersecretvalue"));
    }

    #[tokio::test]
    async fn test_timeout_override() {
        let dir = tempdir().unwrap();
        let (shell, _) = tool(&dir);
        let outcome = shell
            .execute("run_command", &json!({"command": "sleep 5", "timeout_secs": 1}))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.get("timed_out"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_propose_returns_command() {
        let dir = tempdir().unwrap();
        let (shell, _) = tool(&dir);
        let proposal = shell.propose("run_command", &json!({"command": "ls"})).await.unwrap();
        assert_eq!(proposal, Some(Proposal::Command("ls".to_string())));
    }
}
