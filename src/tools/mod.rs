//! Tool system: the uniform action surface exposed to the model
//!
//! Every tool declares a set of actions with JSON schemas and an
//! [`ActionEffect`]. The loop derives approval routing, the read-before-edit
//! guard and its counters from the effect alone. Tools touch the outside
//! world only through [`FileJail`](crate::sandbox::FileJail) and
//! [`CommandGate`](crate::sandbox::CommandGate).

mod done_tool;
mod fs_tool;
mod git_tool;
mod lint_tool;
mod registry;
mod shell_tool;
mod test_runner;

pub use done_tool::DoneTool;
pub use fs_tool::FsTool;
pub use git_tool::GitTool;
pub use lint_tool::{LintTool, detect_linter};
pub use registry::{RegistryError, ToolRegistry, build_registry};
pub use shell_tool::ShellTool;
pub use test_runner::{Detected, TestCounts, TestRunnerTool, detect_test_framework, parse_counts};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::sandbox::{JailError, Violation};

/// What an action does to the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionEffect {
    /// Reads only
    Observe,
    /// Creates or overwrites a file wholesale
    Write,
    /// Modifies part of an existing file
    Edit,
    /// Runs an arbitrary command
    Execute,
    /// Runs the test suite
    Test,
    /// Runs the linter
    Lint,
    /// Signals task completion
    Finish,
}

impl ActionEffect {
    /// Changes file contents
    pub fn mutates(&self) -> bool {
        matches!(self, ActionEffect::Write | ActionEffect::Edit)
    }

    /// Spawns a process through the command gate
    pub fn runs_command(&self) -> bool {
        matches!(self, ActionEffect::Execute | ActionEffect::Test | ActionEffect::Lint)
    }
}

/// One callable action: name, one-line description, JSON schema, effect
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
    pub effect: ActionEffect,
}

impl ActionSpec {
    pub fn new(name: &'static str, description: &'static str, effect: ActionEffect, parameters: Value) -> Self {
        Self {
            name,
            description,
            parameters,
            effect,
        }
    }
}

/// What an action is about to do, shown to the approval gate before dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    Mutation { path: String, diff: String },
    Command(String),
}

/// Uniform result of every invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub ok: bool,
    pub data: Map<String, Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    /// Successful outcome; non-object payloads are stored under `result`
    pub fn success(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: Map::new(),
            error: Some(error.into()),
        }
    }

    /// Failed outcome carrying a payload (e.g. a failing test run)
    pub fn failed_with(data: Value, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::success(data)
        }
    }

    /// Outcome for an action the sandbox refused
    pub fn violation(violation: &Violation) -> Self {
        Self::failure(violation.to_string()).with("violation", json!(true))
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn is_violation(&self) -> bool {
        self.get("violation").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Flattened JSON object `{ok, ..data, error?}` sent back to the model
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("ok".to_string(), json!(self.ok));
        for (k, v) in &self.data {
            out.insert(k.clone(), v.clone());
        }
        if let Some(error) = &self.error {
            out.insert("error".to_string(), json!(error));
        }
        Value::Object(out)
    }

    pub fn render(&self) -> String {
        self.to_json().to_string()
    }
}

/// Errors raised inside a tool. All but `Violation` become a failed outcome.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Violation(#[from] Violation),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl From<JailError> for ToolError {
    fn from(e: JailError) -> Self {
        match e {
            JailError::Violation(v) => ToolError::Violation(v),
            JailError::NotFound(p) => ToolError::NotFound(p),
            JailError::AlreadyExists(p) => ToolError::Precondition(format!("File already exists: {}", p)),
            JailError::Precondition(msg) => ToolError::Precondition(msg),
            JailError::Pattern(msg) => ToolError::InvalidArgs(format!("Invalid search pattern: {}", msg)),
            other @ (JailError::Patch { .. } | JailError::Io { .. }) => ToolError::Failed(other.to_string()),
        }
    }
}

/// A tool owning one or more actions
#[async_trait]
pub trait Tool: Send + Sync {
    /// Short unique name, e.g. `fs`
    fn name(&self) -> &'static str;

    /// One-line description for prompts and listings
    fn description(&self) -> &'static str;

    fn actions(&self) -> Vec<ActionSpec>;

    /// Describe what `action` would do, for approval. `None` for actions
    /// that need no approval.
    async fn propose(&self, _action: &str, _args: &Value) -> Result<Option<Proposal>, ToolError> {
        Ok(None)
    }

    async fn execute(&self, action: &str, args: &Value) -> Result<ToolOutcome, ToolError>;

    /// Self-check used by preflight
    async fn verify(&self) -> ToolOutcome {
        ToolOutcome::success(json!({ "tool": self.name(), "status": "available" }))
    }
}

/// Required string argument
pub fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs(format!("'{}' is required and must be a string", key)))
}

/// Optional string argument; empty strings count as absent
pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Optional non-negative integer argument, accepting numeric strings
pub fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
