//! tests tool - detect the project's test framework, run it, count results

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};

use super::shell_tool::command_outcome;
use super::{ActionEffect, ActionSpec, Proposal, Tool, ToolError, ToolOutcome, optional_str};
use crate::config::CommandOverride;
use crate::sandbox::{CommandGate, FileJail};

const MAX_OUTPUT_CHARS: usize = 5_000;

const PYTEST: &str = "python -m pytest --tb=short -q";

/// A detected tool and the command line that runs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detected {
    pub name: String,
    pub command: String,
}

impl Detected {
    pub(crate) fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
        }
    }
}

/// Pass/fail counts scraped from a test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestCounts {
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
    pub skipped: u64,
}

fn mentions(jail: &FileJail, path: &str, needle: &str) -> bool {
    jail.read(path).map(|c| c.contains(needle)).unwrap_or(false)
}

/// Work out how to run the tests in this workspace.
///
/// Order: configured command, pytest markers, jest configs, `go.mod`,
/// `Cargo.toml`, then a bare `tests/` directory meaning pytest.
pub fn detect_test_framework(jail: &FileJail, overrides: &CommandOverride) -> Option<Detected> {
    if let Some(command) = overrides.command.as_deref().filter(|c| !c.trim().is_empty()) {
        return Some(Detected::new("custom", command));
    }
    if jail.exists("conftest.py") || jail.exists("pytest.ini") || mentions(jail, "pyproject.toml", "pytest") {
        return Some(Detected::new("pytest", PYTEST));
    }
    if ["jest.config.js", "jest.config.ts", "jest.config.mjs"]
        .iter()
        .any(|f| jail.exists(f))
    {
        return Some(Detected::new("jest", "npx jest --no-coverage"));
    }
    if jail.exists("go.mod") {
        return Some(Detected::new("go_test", "go test -v ./..."));
    }
    if jail.exists("Cargo.toml") {
        return Some(Detected::new("cargo_test", "cargo test"));
    }
    if jail.resolve("tests").map(|p| p.is_dir()).unwrap_or(false) {
        return Some(Detected::new("pytest", PYTEST));
    }
    None
}

static PYTEST_COUNTS: LazyLock<Vec<(Regex, usize)>> = LazyLock::new(|| {
    [
        (r"(\d+) passed", 0),
        (r"(\d+) failed", 1),
        (r"(\d+) errors?\b", 2),
        (r"(\d+) skipped", 3),
    ]
    .iter()
    .filter_map(|(p, slot)| Regex::new(p).ok().map(|re| (re, *slot)))
    .collect()
});

static JEST_SUMMARY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+) failed,\s*)?(?:(\d+) skipped,\s*)?(\d+) passed").ok()
});

static CARGO_SUMMARY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored").ok()
});

fn capture(caps: &regex::Captures, idx: usize) -> u64 {
    caps.get(idx).and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
}

/// Scrape counts from combined stdout/stderr for a known framework
pub fn parse_counts(framework: &str, output: &str) -> TestCounts {
    let mut counts = TestCounts::default();
    match framework {
        "jest" => {
            if let Some(caps) = JEST_SUMMARY.as_ref().and_then(|re| re.captures(output)) {
                counts.failed = capture(&caps, 1);
                counts.skipped = capture(&caps, 2);
                counts.passed = capture(&caps, 3);
            }
        }
        "go_test" => {
            counts.passed = output.matches("--- PASS").count() as u64;
            counts.failed = output.matches("--- FAIL").count() as u64;
            counts.skipped = output.matches("--- SKIP").count() as u64;
        }
        "cargo_test" => {
            if let Some(re) = CARGO_SUMMARY.as_ref() {
                for caps in re.captures_iter(output) {
                    counts.passed += capture(&caps, 1);
                    counts.failed += capture(&caps, 2);
                    counts.skipped += capture(&caps, 3);
                }
            }
        }
        _ => {
            // pytest's summary line, also a reasonable guess for custom commands
            let summary = output.lines().rev().find(|l| l.contains(" passed") || l.contains(" failed"));
            if let Some(line) = summary {
                for (re, slot) in PYTEST_COUNTS.iter() {
                    if let Some(caps) = re.captures(line) {
                        let n = capture(&caps, 1);
                        match *slot {
                            0 => counts.passed = n,
                            1 => counts.failed = n,
                            2 => counts.errors = n,
                            _ => counts.skipped = n,
                        }
                    }
                }
            }
        }
    }
    counts
}

/// Single-quote `arg` for `sh -c`
pub(crate) fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Last `max` chars of `text`
pub(crate) fn tail(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(total - max).collect();
    format!("... [truncated]\n{}", skipped)
}

pub struct TestRunnerTool {
    jail: Arc<FileJail>,
    gate: Arc<CommandGate>,
    overrides: CommandOverride,
}

impl TestRunnerTool {
    pub fn new(jail: Arc<FileJail>, gate: Arc<CommandGate>, overrides: CommandOverride) -> Self {
        Self { jail, gate, overrides }
    }

    fn command_for(&self, args: &Value) -> Result<(Detected, String), ToolError> {
        let detected = detect_test_framework(&self.jail, &self.overrides)
            .ok_or_else(|| ToolError::Precondition("No test framework detected".to_string()))?;
        let command = match optional_str(args, "path") {
            Some(path) => {
                self.jail.resolve(path)?;
                format!("{} {}", detected.command, shell_quote(path))
            }
            None => detected.command.clone(),
        };
        Ok((detected, command))
    }
}

#[async_trait]
impl Tool for TestRunnerTool {
    fn name(&self) -> &'static str {
        "tests"
    }

    fn description(&self) -> &'static str {
        "Detect the test framework, run tests, return structured pass/fail results"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new(
                "run_tests",
                "Run the project test suite (framework auto-detected)",
                ActionEffect::Test,
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Optional test file or directory"}
                    }
                }),
            ),
            ActionSpec::new(
                "detect_test_framework",
                "Report which test framework the project uses",
                ActionEffect::Observe,
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn propose(&self, action: &str, args: &Value) -> Result<Option<Proposal>, ToolError> {
        match action {
            "run_tests" => Ok(Some(Proposal::Command(self.command_for(args)?.1))),
            _ => Ok(None),
        }
    }

    async fn execute(&self, action: &str, args: &Value) -> Result<ToolOutcome, ToolError> {
        match action {
            "detect_test_framework" => match detect_test_framework(&self.jail, &self.overrides) {
                Some(detected) => Ok(ToolOutcome::success(json!({
                    "framework": detected.name,
                    "command": detected.command,
                }))),
                None => Err(ToolError::Precondition("No test framework detected".to_string())),
            },
            "run_tests" => {
                let (detected, command) = self.command_for(args)?;
                let result = match self.overrides.timeout_secs {
                    Some(secs) => {
                        self.gate
                            .run_with_timeout(&command, None, Duration::from_secs(secs))
                            .await?
                    }
                    None => self.gate.run(&command, None).await?,
                };
                let counts = parse_counts(&detected.name, &format!("{}\n{}", result.stdout, result.stderr));

                let mut outcome = command_outcome(&result);
                for key in ["stdout", "stderr"] {
                    if let Some(Value::String(text)) = outcome.data.get(key).cloned() {
                        outcome.data.insert(key.to_string(), json!(tail(&text, MAX_OUTPUT_CHARS)));
                    }
                }
                Ok(outcome
                    .with("framework", json!(detected.name))
                    .with("passed", json!(counts.passed))
                    .with("failed", json!(counts.failed))
                    .with("errors", json!(counts.errors))
                    .with("skipped", json!(counts.skipped)))
            }
            other => Err(ToolError::InvalidArgs(format!("Unknown tests action: {}", other))),
        }
    }

    async fn verify(&self) -> ToolOutcome {
        let framework = detect_test_framework(&self.jail, &self.overrides)
            .map(|d| d.name)
            .unwrap_or_else(|| "none".to_string());
        ToolOutcome::success(json!({ "tool": "tests", "framework": framework }))
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
    fn test_detect_order() {
        let dir = tempdir().unwrap();
        let j = jail(&dir);
        assert_eq!(detect_test_framework(&j, &CommandOverride::default()), None);

        std::fs::create_dir(dir.path().join("tests")).unwrap();
        assert_eq!(detect_test_framework(&j, &CommandOverride::default()).unwrap().name, "pytest");

        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_test_framework(&j, &CommandOverride::default()).unwrap().name, "cargo_test");

        std::fs::write(dir.path().join("go.mod"), "module x").unwrap();
        assert_eq!(detect_test_framework(&j, &CommandOverride::default()).unwrap().name, "go_test");

        let custom = CommandOverride {
            command: Some("make test".to_string()),
            timeout_secs: None,
        };
        assert_eq!(detect_test_framework(&j, &custom).unwrap().command, "make test");
    }

    #[test]
    fn test_pyproject_must_mention_pytest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[project]\nname = 'x'\n").unwrap();
        assert_eq!(detect_test_framework(&jail(&dir), &CommandOverride::default()), None);

        std::fs::write(dir.path().join("pyproject.toml"), "[tool.pytest.ini_options]\n").unwrap();
        assert_eq!(detect_test_framework(&jail(&dir), &CommandOverride::default()).unwrap().name, "pytest");
    }

    #[test]
    fn test_parse_pytest() {
        let counts = parse_counts("pytest", "....F\n1 failed, 4 passed, 1 skipped in 0.12s\n");
        assert_eq!(
            counts,
            TestCounts {
                passed: 4,
                failed: 1,
                errors: 0,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_parse_jest_and_cargo() {
        let jest = parse_counts("jest", "Tests:       2 failed, 10 passed, 12 total");
        assert_eq!((jest.passed, jest.failed), (10, 2));

        let cargo = parse_counts(
            "cargo_test",
            "test result: ok. 3 passed; 0 failed; 1 ignored\ntest result: FAILED. 2 passed; 1 failed; 0 ignored",
        );
        assert_eq!((cargo.passed, cargo.failed, cargo.skipped), (5, 1, 1));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("tests/test_a.py"), "'tests/test_a.py'");
        assert_eq!(shell_quote("a'b"), "'a'\\''b'");
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abc", 5), "abc");
        assert!(tail("abcdefgh", 3).ends_with("fgh"));
    }

    #[tokio::test]
    async fn test_run_tests_with_configured_command() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(CommandGate::new(dir.path(), GateConfig::default()));
        let overrides = CommandOverride {
            command: Some("echo '3 passed in 0.01s'".to_string()),
            timeout_secs: None,
        };
        let tool = TestRunnerTool::new(jail(&dir), gate, overrides);

        let outcome = tool.execute("run_tests", &json!({})).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.get("framework"), Some(&json!("custom")));
        assert_eq!(outcome.get("passed"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_failing_tests_are_failed_outcome() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(CommandGate::new(dir.path(), GateConfig::default()));
        let overrides = CommandOverride {
            command: Some("echo '1 failed in 0.01s'; exit 1".to_string()),
            timeout_secs: None,
        };
        let tool = TestRunnerTool::new(jail(&dir), gate, overrides);

        let outcome = tool.execute("run_tests", &json!({})).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.get("failed"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_no_framework_is_precondition() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(CommandGate::new(dir.path(), GateConfig::default()));
        let tool = TestRunnerTool::new(jail(&dir), gate, CommandOverride::default());
        let err = tool.execute("run_tests", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Precondition(_)));
    }
}
