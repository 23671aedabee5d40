//! Tool registry - action-name routing to exactly one owning tool

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{
    ActionEffect, ActionSpec, DoneTool, FsTool, GitTool, LintTool, Proposal, ShellTool, TestRunnerTool, Tool,
    ToolError, ToolOutcome,
};
use crate::config::Config;
use crate::llm::ToolDefinition;
use crate::safety::GitCheckpointer;
use crate::sandbox::{CommandGate, FileJail, Violation};

/// Registration failures. These are configuration errors raised while the
/// registry is assembled, never during a run.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool '{0}' already registered")]
    DuplicateTool(String),

    #[error("Action '{action}' already registered by '{existing}'")]
    DuplicateAction { action: String, existing: String },
}

struct Entry {
    tool: usize,
    spec: ActionSpec,
}

/// Maps every action name to the tool that owns it
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    actions: HashMap<String, Entry>,
    /// Action names in registration order, for stable schemas
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails without side effects if the tool name or any
    /// of its actions is already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            return Err(RegistryError::DuplicateTool(tool.name().to_string()));
        }

        let specs = tool.actions();
        for (i, spec) in specs.iter().enumerate() {
            if let Some(entry) = self.actions.get(spec.name) {
                return Err(RegistryError::DuplicateAction {
                    action: spec.name.to_string(),
                    existing: self.tools[entry.tool].name().to_string(),
                });
            }
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(RegistryError::DuplicateAction {
                    action: spec.name.to_string(),
                    existing: tool.name().to_string(),
                });
            }
        }

        let index = self.tools.len();
        for spec in specs {
            self.order.push(spec.name.to_string());
            self.actions.insert(spec.name.to_string(), Entry { tool: index, spec });
        }
        log::debug!("Registered tool {}", tool.name());
        self.tools.push(tool);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    pub fn action_spec(&self, action: &str) -> Option<&ActionSpec> {
        self.actions.get(action).map(|e| &e.spec)
    }

    pub fn effect_of(&self, action: &str) -> Option<ActionEffect> {
        self.action_spec(action).map(|s| s.effect)
    }

    /// Name of the tool owning `action`
    pub fn owner_of(&self, action: &str) -> Option<&'static str> {
        self.actions.get(action).map(|e| self.tools[e.tool].name())
    }

    /// Every action's schema, the single source of what the model may call
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.actions.get(name))
            .map(|e| ToolDefinition::new(e.spec.name, e.spec.description, e.spec.parameters.clone()))
            .collect()
    }

    /// `(tool, action, description)` triples in registration order
    pub fn list_actions(&self) -> Vec<(&'static str, &'static str, &'static str)> {
        self.order
            .iter()
            .filter_map(|name| self.actions.get(name))
            .map(|e| (self.tools[e.tool].name(), e.spec.name, e.spec.description))
            .collect()
    }

    /// Ask the owning tool what `action` would do, for approval
    pub async fn propose(&self, action: &str, args: &Value) -> Result<Option<Proposal>, ToolError> {
        match self.actions.get(action) {
            Some(entry) => self.tools[entry.tool].propose(action, args).await,
            None => Ok(None),
        }
    }

    /// Forward `action` to its owning tool.
    ///
    /// Unknown actions and tool-internal failures come back as a failed
    /// outcome for the model to recover from. Only a sandbox violation is
    /// returned as an error.
    pub async fn dispatch(&self, action: &str, args: &Value) -> Result<ToolOutcome, Violation> {
        let Some(entry) = self.actions.get(action) else {
            return Ok(ToolOutcome::failure(format!("Unknown action: {}", action)));
        };

        match self.tools[entry.tool].execute(action, args).await {
            Ok(outcome) => Ok(outcome),
            Err(ToolError::Violation(v)) => Err(v),
            Err(e) => Ok(ToolOutcome::failure(e.to_string())),
        }
    }

    /// Run every tool's self-check
    pub async fn verify_all(&self) -> Vec<(&'static str, ToolOutcome)> {
        let mut results = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            results.push((tool.name(), tool.verify().await));
        }
        results
    }
}

/// Assemble the fixed tool set for one workspace
pub fn build_registry(
    jail: Arc<FileJail>,
    gate: Arc<CommandGate>,
    git: Arc<GitCheckpointer>,
    config: &Config,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FsTool::new(jail.clone())))?;
    registry.register(Arc::new(ShellTool::new(gate.clone())))?;
    registry.register(Arc::new(GitTool::new(git)))?;
    registry.register(Arc::new(TestRunnerTool::new(
        jail.clone(),
        gate.clone(),
        config.tests.clone(),
    )))?;
    registry.register(Arc::new(LintTool::new(jail, gate, config.lint.clone())))?;
    registry.register(Arc::new(DoneTool))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;

    struct FakeTool {
        name: &'static str,
        actions: Vec<&'static str>,
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "fake"
        }

        fn actions(&self) -> Vec<ActionSpec> {
            self.actions
                .iter()
                .map(|a| ActionSpec::new(*a, "does a thing", ActionEffect::Observe, json!({"type": "object"})))
                .collect()
        }

        async fn execute(&self, action: &str, args: &Value) -> Result<ToolOutcome, ToolError> {
            match action {
                "escape" => Err(ToolError::Violation(Violation::Traversal {
                    path: PathBuf::from("../x"),
                })),
                "broken" => Err(ToolError::Failed("tool exploded".to_string())),
                _ => Ok(ToolOutcome::success(json!({ "echo": args }))),
            }
        }
    }

    fn fake(name: &'static str, actions: &[&'static str]) -> Arc<dyn Tool> {
        Arc::new(FakeTool {
            name,
            actions: actions.to_vec(),
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(fake("a", &["one", "two"])).unwrap();
        registry.register(fake("b", &["three"])).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.owner_of("three"), Some("b"));
        let names: Vec<String> = registry.tool_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_duplicate_tool_name_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(fake("a", &["one"])).unwrap();
        let err = registry.register(fake("a", &["other"])).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool(_)));
    }

    #[test]
    fn test_duplicate_action_rejected_without_partial_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(fake("a", &["one"])).unwrap();
        let err = registry.register(fake("b", &["fresh", "one"])).unwrap_err();

        assert_eq!(err.to_string(), "Action 'one' already registered by 'a'");
        assert!(!registry.has_action("fresh"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_failed_outcome() {
        let registry = ToolRegistry::new();
        let outcome = registry.dispatch("nope", &json!({})).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("Unknown action: nope"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_and_maps_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(fake("a", &["echo", "escape", "broken"])).unwrap();

        let ok = registry.dispatch("echo", &json!({"x": 1})).await.unwrap();
        assert_eq!(ok.get("echo"), Some(&json!({"x": 1})));

        assert!(registry.dispatch("escape", &json!({})).await.is_err());

        let broken = registry.dispatch("broken", &json!({})).await.unwrap();
        assert!(!broken.ok);
        assert_eq!(broken.error.as_deref(), Some("tool exploded"));
    }

    #[tokio::test]
    async fn test_verify_all_reports_each_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(fake("a", &["one"])).unwrap();
        registry.register(fake("b", &["two"])).unwrap();
        let results = registry.verify_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, o)| o.ok));
    }

    #[test]
    fn test_build_registry_has_fixed_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let jail = Arc::new(FileJail::new(dir.path(), config.jail_config()).unwrap());
        let gate = Arc::new(CommandGate::new(jail.root(), config.gate_config()));
        let git = Arc::new(GitCheckpointer::new(jail.root(), "t-"));

        let registry = build_registry(jail, gate, git, &config).unwrap();
        for action in [
            "read_file",
            "write_file",
            "edit_file",
            "replace_in_file",
            "search",
            "list_files",
            "run_command",
            "git_status",
            "git_diff",
            "git_log",
            "git_checkpoint",
            "run_tests",
            "detect_test_framework",
            "run_lint",
            "done",
        ] {
            assert!(registry.has_action(action), "missing {action}");
        }
        assert_eq!(registry.effect_of("run_tests"), Some(ActionEffect::Test));
        assert_eq!(registry.effect_of("done"), Some(ActionEffect::Finish));
        assert_eq!(registry.effect_of("replace_in_file"), Some(ActionEffect::Edit));
    }
}
