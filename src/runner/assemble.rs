//! Wire a task's collaborators together from configuration.

use std::sync::Arc;

use super::agent_loop::{LoopSettings, Task, TaskRunner};
use crate::collab::{NullStore, SqliteTaskStore, TaskStore, WorkspaceHygiene, WorkspacePreflight};
use crate::config::Config;
use crate::error::{CorralError, Result};
use crate::llm::LlmClient;
use crate::safety::{ApprovalGate, GitCheckpointer, Prompter};
use crate::sandbox::{CommandGate, FileJail};
use crate::state::StateDir;
use crate::tools::build_registry;

/// Build a ready-to-run `TaskRunner` for `task`.
///
/// The jail, gate, checkpointer and registry are scoped to this task's
/// workspace. A task store that cannot be opened degrades to `NullStore`.
pub fn assemble(
    task: Task,
    config: &Config,
    llm: Arc<dyn LlmClient>,
    prompter: Arc<dyn Prompter>,
) -> Result<TaskRunner> {
    if !task.workspace.is_dir() {
        return Err(CorralError::Workspace(format!(
            "{} is not a directory",
            task.workspace.display()
        )));
    }

    let jail = Arc::new(
        FileJail::new(&task.workspace, config.jail_config()).map_err(|e| CorralError::Workspace(e.to_string()))?,
    );
    let state = StateDir::new(jail.root());
    state.ensure()?;

    let gate = Arc::new(CommandGate::new(jail.root(), config.gate_config()));
    let git = Arc::new(GitCheckpointer::new(jail.root(), config.git.tag_prefix.clone()));
    let registry = Arc::new(build_registry(jail.clone(), gate.clone(), git.clone(), config)?);

    let approval = ApprovalGate::new(task.effective_mode(), prompter);

    let preflight = WorkspacePreflight::new(jail.root(), llm.clone(), git.clone())
        .with_registry(registry.clone())
        .with_log_max_mb(config.cleanup.log_max_mb);
    let hygiene = WorkspaceHygiene::new(state.clone(), config.cleanup.clone()).with_gate(gate);

    let store: Arc<dyn TaskStore> = if config.store.enabled {
        match SqliteTaskStore::open(&state.store_path()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                log::warn!("Task store unavailable, continuing without it: {}", e);
                Arc::new(NullStore)
            }
        }
    } else {
        Arc::new(NullStore)
    };

    log::debug!(
        "Assembled task {} in {} ({} actions, mode {})",
        task.id,
        jail.root().display(),
        registry.len(),
        approval.mode()
    );

    Ok(TaskRunner::new(task, LoopSettings::from_config(config), llm, registry, approval)
        .with_checkpoints(git)
        .with_preflight(Arc::new(preflight))
        .with_hygiene(Arc::new(hygiene))
        .with_store(store)
        .with_journal_dir(state.journal_dir())
        .with_partial_dir(state.partial_dir()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::safety::{ApprovalMode, ScriptedPrompter};
    use tempfile::tempdir;

    #[test]
    fn test_assemble_registers_full_tool_set() {
        let dir = tempdir().unwrap();
        let task = Task::new("x", dir.path());
        let runner = assemble(
            task,
            &Config::default(),
            Arc::new(MockLlmClient::new()),
            Arc::new(ScriptedPrompter::new(vec![])),
        )
        .unwrap();

        for action in ["read_file", "run_command", "git_status", "run_tests", "run_lint", "done"] {
            assert!(runner.registry().has_action(action), "missing {}", action);
        }
        assert!(dir.path().join(".corral").join("journal").is_dir());
    }

    #[test]
    fn test_spike_upgrades_auto() {
        let dir = tempdir().unwrap();
        let task = Task::new("x", dir.path()).with_mode(ApprovalMode::Auto).with_spike(true);
        let runner = assemble(
            task,
            &Config::default(),
            Arc::new(MockLlmClient::new()),
            Arc::new(ScriptedPrompter::new(vec![])),
        )
        .unwrap();
        assert_eq!(runner.task().effective_mode(), ApprovalMode::Ask);
    }

    #[test]
    fn test_missing_workspace_is_an_error() {
        let dir = tempdir().unwrap();
        let task = Task::new("x", dir.path().join("missing"));
        let err = assemble(
            task,
            &Config::default(),
            Arc::new(MockLlmClient::new()),
            Arc::new(ScriptedPrompter::new(vec![])),
        )
        .err()
        .unwrap();
        assert!(matches!(err, CorralError::Workspace(_)));
    }
}
