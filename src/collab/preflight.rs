//! Preflight - readiness checks run before any model call.
//!
//! A failed check aborts the task. A warning is reported and ignored.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::llm::LlmClient;
use crate::safety::{GitCheckpointer, VersionControl};
use crate::state::StateDir;
use crate::tools::ToolRegistry;

const TEMP_FILE_WARN_COUNT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    pub name: String,
    pub detail: String,
    pub warn: bool,
    pub elapsed_ms: u64,
}

impl CheckResult {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            name: name.to_string(),
            detail: detail.into(),
            warn: false,
            elapsed_ms: 0,
        }
    }

    pub fn warning(name: &str, detail: impl Into<String>) -> Self {
        Self {
            warn: true,
            ..Self::pass(name, detail)
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            ..Self::pass(name, detail)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn ready(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.ok && !c.warn).count()
    }

    pub fn warned(&self) -> usize {
        self.checks.iter().filter(|c| c.warn).count()
    }

    pub fn failed(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.ok).collect()
    }

    /// `name: detail` of each failed check, joined for a failure reason
    pub fn failure_summary(&self) -> String {
        self.failed()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[async_trait]
pub trait Preflight: Send + Sync {
    async fn run_all(&self) -> PreflightReport;
}

/// The standard checks for one workspace
pub struct WorkspacePreflight {
    workspace: PathBuf,
    state: StateDir,
    llm: Arc<dyn LlmClient>,
    git: Arc<GitCheckpointer>,
    registry: Option<Arc<ToolRegistry>>,
    log_max_bytes: u64,
}

impl WorkspacePreflight {
    pub fn new(workspace: impl Into<PathBuf>, llm: Arc<dyn LlmClient>, git: Arc<GitCheckpointer>) -> Self {
        let workspace = workspace.into();
        Self {
            state: StateDir::new(&workspace),
            workspace,
            llm,
            git,
            registry: None,
            log_max_bytes: 50 * 1024 * 1024,
        }
    }

    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_log_max_mb(mut self, mb: u64) -> Self {
        self.log_max_bytes = mb * 1024 * 1024;
        self
    }

    fn check_workspace(&self) -> CheckResult {
        const NAME: &str = "Workspace";
        if !self.workspace.is_dir() {
            return CheckResult::fail(NAME, format!("{} does not exist", self.workspace.display()));
        }
        let scratch = self.workspace.join(format!(".corral-preflight-{}", std::process::id()));
        match std::fs::write(&scratch, b"ok") {
            Ok(()) => {
                let _ = std::fs::remove_file(&scratch);
                CheckResult::pass(NAME, self.workspace.display().to_string())
            }
            Err(e) => CheckResult::fail(NAME, format!("not writable: {}", e)),
        }
    }

    fn check_git(&self) -> CheckResult {
        const NAME: &str = "Git repo";
        if !self.git.is_repo() {
            return CheckResult::warning(NAME, "not a git repository; one will be initialized for checkpoints");
        }
        match self.git.has_uncommitted_changes() {
            Ok(true) => CheckResult::warning(NAME, "dirty working tree"),
            Ok(false) => CheckResult::pass(NAME, "clean"),
            Err(e) => CheckResult::warning(NAME, format!("check skipped: {}", e)),
        }
    }

    async fn check_llm(&self) -> CheckResult {
        const NAME: &str = "LLM endpoint";
        match self.llm.ping().await {
            Ok(()) => CheckResult::pass(NAME, format!("model {}", self.llm.model())),
            Err(e) => CheckResult::fail(NAME, e.to_string()),
        }
    }

    async fn check_tools(&self) -> CheckResult {
        const NAME: &str = "Tools";
        let Some(registry) = &self.registry else {
            return CheckResult::warning(NAME, "no registry (skipped)");
        };
        let results = registry.verify_all().await;
        let failing: Vec<String> = results
            .iter()
            .filter(|(_, outcome)| !outcome.ok)
            .map(|(name, outcome)| format!("{} ({})", name, outcome.error.as_deref().unwrap_or("failed")))
            .collect();
        if failing.is_empty() {
            CheckResult::pass(NAME, format!("{} tools available", results.len()))
        } else {
            CheckResult::warning(NAME, format!("unavailable: {}", failing.join(", ")))
        }
    }

    fn check_temp_files(&self) -> CheckResult {
        const NAME: &str = "Temp files";
        let count = std::fs::read_dir(self.state.tmp_dir())
            .map(|entries| entries.count())
            .unwrap_or(0);
        if count > TEMP_FILE_WARN_COUNT {
            CheckResult::warning(NAME, format!("{} files in tmp/", count))
        } else {
            CheckResult::pass(NAME, format!("{} files", count))
        }
    }

    fn check_log_size(&self) -> CheckResult {
        const NAME: &str = "Log size";
        let size = std::fs::metadata(self.state.log_file()).map(|m| m.len()).unwrap_or(0);
        let mb = size as f64 / (1024.0 * 1024.0);
        if size > self.log_max_bytes {
            CheckResult::warning(NAME, format!("{:.1}MB, will rotate", mb))
        } else {
            CheckResult::pass(NAME, format!("{:.1}MB", mb))
        }
    }
}

fn timed(mut result: CheckResult, started: Instant) -> CheckResult {
    result.elapsed_ms = started.elapsed().as_millis() as u64;
    result
}

#[async_trait]
impl Preflight for WorkspacePreflight {
    async fn run_all(&self) -> PreflightReport {
        let mut checks = Vec::new();

        let started = Instant::now();
        checks.push(timed(self.check_workspace(), started));
        let started = Instant::now();
        checks.push(timed(self.check_git(), started));
        let started = Instant::now();
        checks.push(timed(self.check_llm().await, started));
        let started = Instant::now();
        checks.push(timed(self.check_tools().await, started));
        let started = Instant::now();
        checks.push(timed(self.check_temp_files(), started));
        let started = Instant::now();
        checks.push(timed(self.check_log_size(), started));

        for check in &checks {
            if !check.ok {
                log::error!("Preflight {} failed: {}", check.name, check.detail);
            } else if check.warn {
                log::warn!("Preflight {}: {}", check.name, check.detail);
            } else {
                log::debug!("Preflight {}: {} ({}ms)", check.name, check.detail, check.elapsed_ms);
            }
        }
        PreflightReport { checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use tempfile::tempdir;

    fn preflight(dir: &tempfile::TempDir, llm: MockLlmClient) -> WorkspacePreflight {
        let git = Arc::new(GitCheckpointer::new(dir.path(), "t-"));
        WorkspacePreflight::new(dir.path(), Arc::new(llm), git)
    }

    #[tokio::test]
    async fn test_ready_with_reachable_llm() {
        let dir = tempdir().unwrap();
        let report = preflight(&dir, MockLlmClient::new()).run_all().await;
        assert!(report.ready(), "{}", report.failure_summary());
        assert_eq!(report.checks.len(), 6);
        assert!(report.warned() >= 1);
    }

    #[tokio::test]
    async fn test_unreachable_llm_is_fatal() {
        let dir = tempdir().unwrap();
        let llm = MockLlmClient::new();
        llm.fail_ping("connection refused");
        let report = preflight(&dir, llm).run_all().await;
        assert!(!report.ready());
        assert_eq!(report.failed().len(), 1);
        assert!(report.failure_summary().starts_with("LLM endpoint:"));
    }

    #[tokio::test]
    async fn test_missing_workspace_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let git = Arc::new(GitCheckpointer::new(&missing, "t-"));
        let report = WorkspacePreflight::new(&missing, Arc::new(MockLlmClient::new()), git)
            .run_all()
            .await;
        assert!(!report.ready());
        assert!(report.failure_summary().contains("Workspace"));
    }

    #[tokio::test]
    async fn test_many_temp_files_warn() {
        let dir = tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.ensure().unwrap();
        for i in 0..=TEMP_FILE_WARN_COUNT {
            std::fs::write(state.tmp_dir().join(format!("f{}", i)), "x").unwrap();
        }
        let report = preflight(&dir, MockLlmClient::new()).run_all().await;
        let temp = report.checks.iter().find(|c| c.name == "Temp files").unwrap();
        assert!(temp.ok && temp.warn);
    }
}
