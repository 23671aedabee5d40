//! lint tool - detect and run the project's linter

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};

use super::shell_tool::command_outcome;
use super::test_runner::{Detected, tail};
use super::{ActionEffect, ActionSpec, Proposal, Tool, ToolError, ToolOutcome};
use crate::config::CommandOverride;
use crate::sandbox::{CommandGate, FileJail};

const MAX_OUTPUT_CHARS: usize = 5_000;

const ESLINT_CONFIGS: &[&str] = &[
    ".eslintrc",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.json",
    ".eslintrc.yml",
    "eslint.config.js",
    "eslint.config.mjs",
];

/// `file:line[:col]` at the start of a line, the shape most linters report
static ISSUE_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?m)^\s*[^\s:]+:\d+(?::\d+)?").ok());

/// Work out how to lint this workspace.
///
/// Order: configured command, ruff, eslint, `cargo clippy`, `go vet`.
pub fn detect_linter(jail: &FileJail, overrides: &CommandOverride) -> Option<Detected> {
    if let Some(command) = overrides.command.as_deref().filter(|c| !c.trim().is_empty()) {
        return Some(Detected::new("custom", command));
    }
    let pyproject_ruff = jail
        .read("pyproject.toml")
        .map(|c| c.contains("ruff"))
        .unwrap_or(false);
    if jail.exists("ruff.toml") || jail.exists(".ruff.toml") || pyproject_ruff {
        return Some(Detected::new("ruff", "ruff check ."));
    }
    if ESLINT_CONFIGS.iter().any(|f| jail.exists(f)) {
        return Some(Detected::new("eslint", "npx eslint ."));
    }
    if jail.exists("Cargo.toml") {
        return Some(Detected::new("clippy", "cargo clippy --quiet"));
    }
    if jail.exists("go.mod") {
        return Some(Detected::new("go_vet", "go vet ./..."));
    }
    None
}

fn count_issues(output: &str) -> usize {
    ISSUE_LINE
        .as_ref()
        .map(|re| re.find_iter(output).count())
        .unwrap_or(0)
}

pub struct LintTool {
    jail: Arc<FileJail>,
    gate: Arc<CommandGate>,
    overrides: CommandOverride,
}

impl LintTool {
    pub fn new(jail: Arc<FileJail>, gate: Arc<CommandGate>, overrides: CommandOverride) -> Self {
        Self { jail, gate, overrides }
    }

    fn detected(&self) -> Result<Detected, ToolError> {
        detect_linter(&self.jail, &self.overrides)
            .ok_or_else(|| ToolError::Precondition("No linter detected".to_string()))
    }
}

#[async_trait]
impl Tool for LintTool {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn description(&self) -> &'static str {
        "Detect and run the project linter (ruff, eslint, clippy, go vet)"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec::new(
            "run_lint",
            "Run the detected linter and report issues",
            ActionEffect::Lint,
            json!({"type": "object", "properties": {}}),
        )]
    }

    async fn propose(&self, action: &str, _args: &Value) -> Result<Option<Proposal>, ToolError> {
        match action {
            "run_lint" => Ok(Some(Proposal::Command(self.detected()?.command))),
            _ => Ok(None),
        }
    }

    async fn execute(&self, action: &str, _args: &Value) -> Result<ToolOutcome, ToolError> {
        if action != "run_lint" {
            return Err(ToolError::InvalidArgs(format!("Unknown lint action: {}", action)));
        }
        let detected = self.detected()?;
        let result = match self.overrides.timeout_secs {
            Some(secs) => {
                self.gate
                    .run_with_timeout(&detected.command, None, Duration::from_secs(secs))
                    .await?
            }
            None => self.gate.run(&detected.command, None).await?,
        };
        let issues = count_issues(&result.stdout) + count_issues(&result.stderr);

        let mut outcome = command_outcome(&result);
        for key in ["stdout", "stderr"] {
            if let Some(Value::String(text)) = outcome.data.get(key).cloned() {
                outcome.data.insert(key.to_string(), json!(tail(&text, MAX_OUTPUT_CHARS)));
            }
        }
        Ok(outcome
            .with("linter", json!(detected.name))
            .with("issues", json!(issues)))
    }

    async fn verify(&self) -> ToolOutcome {
        let linter = detect_linter(&self.jail, &self.overrides)
            .map(|d| d.name)
            .unwrap_or_else(|| "none".to_string());
        ToolOutcome::success(json!({ "tool": "lint", "linter": linter }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{GateConfig, JailConfig};
    use tempfile::tempdir;

    fn jail(dir: &tempfile::TempDir) -> Arc<FileJail> {
        Arc::new(FileJail::new(dir.path(), JailConfig::default()).unwrap())
    }

    #[test]
    fn test_detect_linter() {
        let dir = tempdir().unwrap();
        let j = jail(&dir);
        assert_eq!(detect_linter(&j, &CommandOverride::default()), None);

        std::fs::write(dir.path().join("go.mod"), "module x").unwrap();
        assert_eq!(detect_linter(&j, &CommandOverride::default()).unwrap().name, "go_vet");

        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_linter(&j, &CommandOverride::default()).unwrap().name, "clippy");

        std::fs::write(dir.path().join(".eslintrc.json"), "{}").unwrap();
        assert_eq!(detect_linter(&j, &CommandOverride::default()).unwrap().name, "eslint");

        std::fs::write(dir.path().join("pyproject.toml"), "[tool.ruff]\n").unwrap();
        assert_eq!(detect_linter(&j, &CommandOverride::default()).unwrap().command, "ruff check .");
    }

    #[test]
    fn test_count_issues() {
        let output = "calc.py:3:1: F401 unused import\nsrc/a.rs:10: warning\nFound 2 errors.\n";
        assert_eq!(count_issues(output), 2);
    }

    #[tokio::test]
    async fn test_run_lint_custom_command() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(CommandGate::new(dir.path(), GateConfig::default()));
        let overrides = CommandOverride {
            command: Some("echo 'a.py:1:1: E1 bad'; exit 1".to_string()),
            timeout_secs: Some(10),
        };
        let tool = LintTool::new(jail(&dir), gate, overrides);

        let outcome = tool.execute("run_lint", &json!({})).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.get("issues"), Some(&json!(1)));
        assert_eq!(outcome.get("linter"), Some(&json!("custom")));
    }
}
