//! TaskRunner - drives one task from init to cleanup.
//!
//! Phases: init (preflight, start checkpoint), plan (ask/paranoid only),
//! iterate (one model call, then each requested invocation in order),
//! finalize (end checkpoint, or rollback to the start checkpoint) and
//! cleanup, which always runs.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::conversation::Conversation;
use super::history::{HistoryEntry, ToolHistory};
use super::prompts;
use crate::collab::{Hygiene, Journal, NullStore, Preflight, StoreError, TaskMetrics, TaskRecord, TaskStore, ToolCallRecord};
use crate::config::{AgentConfig, Config};
use crate::id::{generate_task_id, short_id};
use crate::llm::{ChatRequest, LlmClient, LlmError, Message, RetryPolicy, ToolInvocation, Usage, chat_with_retry};
use crate::redact::redact;
use crate::safety::{ApprovalDenied, ApprovalGate, ApprovalMode, VersionControl};
use crate::sandbox::Violation;
use crate::tools::{ActionEffect, Proposal, ToolError, ToolOutcome, ToolRegistry};

/// History entries quoted in a reflection prompt
const REFLECTION_WINDOW: usize = 8;
const STEP_DETAIL_CHARS: usize = 500;

/// One unit of work for the loop
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub objective: String,
    pub workspace: PathBuf,
    pub approval_mode: ApprovalMode,
    pub max_iterations: u32,
    /// Low prior confidence; upgrades `auto` to `ask`
    pub spike: bool,
}

impl Task {
    pub fn new(objective: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            id: generate_task_id(),
            objective: objective.into(),
            workspace: workspace.into(),
            approval_mode: ApprovalMode::default(),
            max_iterations: AgentConfig::default().max_iterations,
            spike: false,
        }
    }

    pub fn with_mode(mut self, mode: ApprovalMode) -> Self {
        self.approval_mode = mode;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_spike(mut self, spike: bool) -> Self {
        self.spike = spike;
        self
    }

    /// The approval mode actually enforced
    pub fn effective_mode(&self) -> ApprovalMode {
        self.approval_mode.with_spike(self.spike)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub tool_calls: u32,
    pub tests_run: u32,
    pub lint_runs: u32,
    pub files_changed: u32,
    pub violations: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    /// Single human-readable reason on every failure path
    pub reason: Option<String>,
    /// The model's summary from an accepted `done`
    pub summary: Option<String>,
    pub iterations: u32,
    pub counters: RunCounters,
    /// Checkpoint tags that still exist, oldest first
    pub checkpoints: Vec<String>,
    pub usage: Usage,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Why a step could not complete normally
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The sandbox refused the action; the model may recover
    #[error(transparent)]
    Violation(#[from] Violation),

    /// A human said no; ends the task with rollback
    #[error(transparent)]
    Denied(#[from] ApprovalDenied),

    /// The model stayed unreachable after retries; ends the task with rollback
    #[error("model service error: {0}")]
    Service(#[from] LlmError),
}

/// Loop tuning, taken from the `agent`, `llm` and `git` config sections
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub checkpoint_every: u32,
    pub stuck_window: usize,
    pub reflect_every: u32,
    pub urgency_threshold: u32,
    pub read_before_edit: bool,
    pub max_history_chars: usize,
    pub failure_context: usize,
    pub auto_checkpoint: bool,
    pub preserve_partial_diff: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            checkpoint_every: config.agent.checkpoint_every,
            stuck_window: config.agent.stuck_window,
            reflect_every: config.agent.reflect_every,
            urgency_threshold: config.agent.urgency_threshold,
            read_before_edit: config.agent.read_before_edit,
            max_history_chars: config.agent.max_history_chars,
            failure_context: config.agent.failure_context,
            auto_checkpoint: config.git.auto_checkpoint,
            preserve_partial_diff: config.git.preserve_partial_diff,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            retry: config.retry_policy(),
        }
    }
}

/// How the iterate phase ended
enum Ending {
    Done { summary: String },
    Failed { reason: String, exhausted: bool },
}

impl Ending {
    fn failed(reason: impl Into<String>) -> Self {
        Ending::Failed {
            reason: reason.into(),
            exhausted: false,
        }
    }
}

/// Mutable state of one run, threaded through every phase
struct RunState {
    conversation: Conversation,
    history: ToolHistory,
    counters: RunCounters,
    changed_files: HashSet<String>,
    mutations_since_checkpoint: u32,
    start_tag: Option<String>,
    checkpoints: Vec<String>,
    usage: Usage,
    iterations: u32,
    journal: Journal,
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

fn path_arg(arguments: &Value) -> Option<&str> {
    arguments.get("path").and_then(Value::as_str)
}

pub struct TaskRunner {
    task: Task,
    settings: LoopSettings,
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    approval: ApprovalGate,
    vcs: Option<Arc<dyn VersionControl>>,
    preflight: Option<Arc<dyn Preflight>>,
    store: Arc<dyn TaskStore>,
    hygiene: Option<Arc<dyn Hygiene>>,
    journal_dir: Option<PathBuf>,
    partial_dir: Option<PathBuf>,
}

impl TaskRunner {
    pub fn new(
        task: Task,
        settings: LoopSettings,
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        approval: ApprovalGate,
    ) -> Self {
        Self {
            task,
            settings,
            llm,
            registry,
            approval,
            vcs: None,
            preflight: None,
            store: Arc::new(NullStore),
            hygiene: None,
            journal_dir: None,
            partial_dir: None,
        }
    }

    pub fn with_checkpoints(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_preflight(mut self, preflight: Arc<dyn Preflight>) -> Self {
        self.preflight = Some(preflight);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_hygiene(mut self, hygiene: Arc<dyn Hygiene>) -> Self {
        self.hygiene = Some(hygiene);
        self
    }

    /// Export the run journal to `dir` during cleanup
    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    /// Save discarded work here before an exhaustion rollback
    pub fn with_partial_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.partial_dir = Some(dir.into());
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the task to a terminal state. Never panics on model, tool or
    /// store failures; every failure path ends in a `TaskOutcome` with a reason.
    pub async fn run(&self) -> TaskOutcome {
        info!(task_id = %self.task.id, mode = %self.approval.mode(), "Starting task");
        self.best_effort(
            "create_task",
            self.store.create_task(&TaskRecord {
                id: self.task.id.clone(),
                objective: self.task.objective.clone(),
                workspace: self.task.workspace.display().to_string(),
                approval_mode: self.approval.mode().to_string(),
            }),
        );

        let mut state = self.open(Journal::new(&self.task.id, &self.task.objective)).await;
        let ending = self.drive(&mut state).await;
        let outcome = self.finalize(&mut state, ending);

        self.best_effort(
            "update_task_status",
            self.store
                .update_task_status(&self.task.id, outcome.status.as_str(), outcome.reason.as_deref()),
        );
        self.best_effort(
            "record_metrics",
            self.store.record_metrics(
                &self.task.id,
                &TaskMetrics {
                    iterations: outcome.iterations,
                    tool_calls: outcome.counters.tool_calls,
                    tests_run: outcome.counters.tests_run,
                    lint_runs: outcome.counters.lint_runs,
                    files_changed: outcome.counters.files_changed,
                    violations: outcome.counters.violations,
                    prompt_tokens: outcome.usage.prompt_tokens,
                    completion_tokens: outcome.usage.completion_tokens,
                },
            ),
        );

        self.cleanup(&mut state);
        info!(
            task_id = %self.task.id,
            status = %outcome.status,
            iterations = outcome.iterations,
            tool_calls = outcome.counters.tool_calls,
            "Task finished"
        );
        outcome
    }

    /// Build the initial conversation: system prompt plus task statement
    async fn open(&self, mut journal: Journal) -> RunState {
        let listing = match self.registry.dispatch("list_files", &json!({"depth": 2})).await {
            Ok(outcome) if outcome.ok => outcome
                .get("files")
                .and_then(Value::as_array)
                .map(|files| {
                    files
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default(),
            _ => String::new(),
        };

        let system = prompts::system_prompt(
            &self.registry.list_actions(),
            &self.task.workspace.display().to_string(),
            self.task.spike,
        );
        journal.record("init", format!("{} actions registered", self.registry.len()));

        RunState {
            conversation: Conversation::new(
                system,
                prompts::task_message(&self.task.objective, &listing),
                self.settings.max_history_chars,
            ),
            history: ToolHistory::new(),
            counters: RunCounters::default(),
            changed_files: HashSet::new(),
            mutations_since_checkpoint: 0,
            start_tag: None,
            checkpoints: Vec::new(),
            usage: Usage::default(),
            iterations: 0,
            journal,
        }
    }

    async fn drive(&self, state: &mut RunState) -> Ending {
        if let Some(preflight) = &self.preflight {
            let report = preflight.run_all().await;
            state.journal.record(
                "preflight",
                format!(
                    "{} passed, {} warned, {} failed",
                    report.passed(),
                    report.warned(),
                    report.failed().len()
                ),
            );
            if !report.ready() {
                return Ending::failed(format!("preflight failed: {}", report.failure_summary()));
            }
        }

        self.start_checkpoint(state);

        if self.approval.mode() != ApprovalMode::Auto
            && let Err(e) = self.plan(state).await
        {
            return Ending::failed(e.to_string());
        }

        for iteration in 1..=self.task.max_iterations {
            state.iterations = iteration;
            if let Some(ending) = self.iterate(state, iteration).await {
                return ending;
            }
        }

        let last = state.history.last_results(self.settings.failure_context);
        let last = if last.is_empty() {
            "no tool calls were made".to_string()
        } else {
            last.join(" | ")
        };
        Ending::Failed {
            reason: format!(
                "iteration limit reached ({}) without a validated done; last results: {}",
                self.task.max_iterations, last
            ),
            exhausted: true,
        }
    }

    fn auto_checkpointer(&self) -> Option<&Arc<dyn VersionControl>> {
        self.vcs.as_ref().filter(|_| self.settings.auto_checkpoint)
    }

    fn start_checkpoint(&self, state: &mut RunState) {
        let Some(vcs) = self.auto_checkpointer() else {
            return;
        };
        match vcs.checkpoint(&format!("corral: start task {}", self.task.id)) {
            Ok(tag) => {
                state.journal.record("checkpoint", format!("start {}", tag));
                state.start_tag = Some(tag.clone());
                state.checkpoints.push(tag);
            }
            Err(e) => {
                warn!(task_id = %self.task.id, error = %e, "Start checkpoint failed; continuing without rollback");
                state.journal.record("checkpoint", format!("start checkpoint failed: {}", e));
            }
        }
    }

    /// One tool-less model call producing a plan, then plan approval
    async fn plan(&self, state: &mut RunState) -> Result<(), StepError> {
        let request_text = prompts::planning_request();
        let mut messages = state.conversation.messages().to_vec();
        messages.push(Message::user(request_text.clone()));

        let request = ChatRequest::new(messages)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);
        let response = chat_with_retry(self.llm.as_ref(), &request, &self.settings.retry).await?;
        state.usage.add(&response.usage);

        let plan = response.content.trim().to_string();
        state.journal.record("plan", clip(&plan, STEP_DETAIL_CHARS));
        self.best_effort("append_step", self.store.append_step(&self.task.id, 0, "plan", &plan));

        self.approval.approve_plan(&plan)?;

        state.conversation.push(Message::user(request_text));
        state.conversation.push(Message::assistant(plan));
        state.conversation.push(Message::user(prompts::plan_approved()));
        Ok(())
    }

    /// One model call and its tool invocations. `Some` ends the task.
    async fn iterate(&self, state: &mut RunState, iteration: u32) -> Option<Ending> {
        let reflect_every = self.settings.reflect_every;
        if reflect_every > 0 && iteration > 1 && (iteration - 1) % reflect_every == 0 {
            state.conversation.push(Message::user(prompts::reflection(
                iteration,
                self.task.max_iterations,
                &state.history.recent_summary(REFLECTION_WINDOW),
                self.settings.urgency_threshold,
            )));
        }
        state.conversation.compact();

        let request = ChatRequest::new(state.conversation.messages().to_vec())
            .with_tools(self.registry.tool_definitions())
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);

        let response = match chat_with_retry(self.llm.as_ref(), &request, &self.settings.retry).await {
            Ok(response) => response,
            Err(e) => {
                warn!(task_id = %self.task.id, iteration, error = %e, "Model call failed after retries");
                return Some(Ending::failed(StepError::Service(e).to_string()));
            }
        };
        state.usage.add(&response.usage);

        if !response.has_tool_calls() {
            debug!(task_id = %self.task.id, iteration, "Response carried no tool calls");
            self.best_effort(
                "append_step",
                self.store
                    .append_step(&self.task.id, iteration, "model", &clip(&response.content, STEP_DETAIL_CHARS)),
            );
            state
                .journal
                .record("iteration", format!("{}: no tool calls, nudged", iteration));
            state.conversation.push(Message::assistant(response.content));
            state.conversation.push(Message::user(prompts::tool_use_nudge()));
            return None;
        }

        let calls = response.tool_calls;
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        self.best_effort(
            "append_step",
            self.store
                .append_step(&self.task.id, iteration, "model", &format!("tool calls: {}", names.join(", "))),
        );
        state
            .conversation
            .push(Message::assistant_with_calls(response.content, calls.clone()));

        let mut deferred = Vec::new();
        let mut ending = None;
        for call in &calls {
            match self.handle_call(state, iteration, call, &mut deferred).await {
                Ok(None) => {}
                Ok(Some(summary)) => {
                    ending = Some(Ending::Done { summary });
                    break;
                }
                Err(e) => {
                    warn!(task_id = %self.task.id, iteration, action = %call.name, error = %e, "Step ended the task");
                    ending = Some(Ending::failed(e.to_string()));
                    break;
                }
            }
        }
        state.conversation.extend(deferred);
        ending
    }

    /// Run one invocation and record it. Returns the summary of an accepted
    /// `done`. Only approval denials come back as errors.
    async fn handle_call(
        &self,
        state: &mut RunState,
        iteration: u32,
        call: &ToolInvocation,
        deferred: &mut Vec<Message>,
    ) -> Result<Option<String>, StepError> {
        let started = Instant::now();
        let effect = self.registry.effect_of(&call.name);

        let outcome = match self.execute_call(state, iteration, call, effect, deferred).await {
            Ok(outcome) => outcome,
            Err(StepError::Violation(v)) => {
                warn!(task_id = %self.task.id, iteration, action = %call.name, violation = %v, "Sandbox violation");
                state.counters.violations += 1;
                ToolOutcome::violation(&v)
            }
            Err(e) => return Err(e),
        };

        state.counters.tool_calls += 1;
        match effect {
            Some(ActionEffect::Test) => state.counters.tests_run += 1,
            Some(ActionEffect::Lint) => state.counters.lint_runs += 1,
            _ => {}
        }
        if outcome.ok && effect.is_some_and(|e| e.mutates()) {
            if let Some(path) = path_arg(&call.arguments) {
                state
                    .changed_files
                    .insert(path.trim_start_matches("./").to_string());
            }
            state.counters.files_changed = state.changed_files.len() as u32;
            state.mutations_since_checkpoint += 1;
            self.intermediate_checkpoint(state);
        }

        info!(
            task_id = %self.task.id,
            iteration,
            action = %call.name,
            ok = outcome.ok,
            "Tool call"
        );
        self.best_effort(
            "log_tool_call",
            self.store.log_tool_call(&ToolCallRecord {
                task_id: self.task.id.clone(),
                iteration,
                action: call.name.clone(),
                arguments: redact(&call.arguments.to_string()),
                ok: outcome.ok,
                error: outcome.error.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            }),
        );
        state.journal.record(
            "iteration",
            format!(
                "{}: {} -> {}",
                iteration,
                call.name,
                match &outcome.error {
                    None => "ok".to_string(),
                    Some(error) => format!("failed: {}", clip(error, 120)),
                }
            ),
        );

        state.conversation.push(Message::tool(&call.id, outcome.render()));
        let accepted_done = effect == Some(ActionEffect::Finish) && outcome.ok;
        let summary = outcome
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        state.history.push(HistoryEntry::new(
            iteration,
            &call.name,
            &call.arguments,
            effect,
            outcome,
        ));

        if state.history.stuck(self.settings.stuck_window) {
            info!(task_id = %self.task.id, iteration, action = %call.name, "Stuck detected, nudging");
            deferred.push(Message::user(prompts::stuck_nudge(&call.name, self.settings.stuck_window)));
        }

        Ok(accepted_done.then_some(summary))
    }

    async fn execute_call(
        &self,
        state: &mut RunState,
        iteration: u32,
        call: &ToolInvocation,
        effect: Option<ActionEffect>,
        deferred: &mut Vec<Message>,
    ) -> Result<ToolOutcome, StepError> {
        let Some(effect) = effect else {
            return Ok(self.registry.dispatch(&call.name, &call.arguments).await?);
        };

        match effect {
            ActionEffect::Finish => {
                if let Err(reason) = state.history.validate_done() {
                    info!(task_id = %self.task.id, iteration, "done rejected");
                    return Ok(ToolOutcome::failure(prompts::done_rejection(&reason)).with("done_rejected", json!(true)));
                }
            }
            ActionEffect::Edit if self.settings.read_before_edit => {
                self.read_before_edit(state, iteration, call, deferred).await;
            }
            _ => {}
        }

        if effect.mutates() || effect.runs_command() {
            match self.registry.propose(&call.name, &call.arguments).await {
                Ok(Some(Proposal::Mutation { path, diff })) => self.approval.approve_mutation(&path, &diff)?,
                Ok(Some(Proposal::Command(command))) => self.approval.approve_command(&redact(&command))?,
                Ok(None) => {}
                Err(ToolError::Violation(v)) => return Err(v.into()),
                Err(e) => return Ok(ToolOutcome::failure(e.to_string())),
            }
        }

        Ok(self.registry.dispatch(&call.name, &call.arguments).await?)
    }

    /// Read the target of an edit the model never looked at, and show it the
    /// content once the current batch of tool results is in
    async fn read_before_edit(
        &self,
        state: &mut RunState,
        iteration: u32,
        call: &ToolInvocation,
        deferred: &mut Vec<Message>,
    ) {
        let Some(path) = path_arg(&call.arguments) else {
            return;
        };
        if state.history.knows_content_of(path) {
            return;
        }

        let args = json!({ "path": path });
        // A missing file or a violation surfaces through the edit itself.
        if let Ok(outcome) = self.registry.dispatch("read_file", &args).await
            && outcome.ok
        {
            debug!(task_id = %self.task.id, iteration, path, "Auto-reading file before edit");
            let content = outcome.get("content").and_then(Value::as_str).unwrap_or_default();
            deferred.push(Message::user(prompts::auto_read_note(path, content)));
            state.history.push(HistoryEntry::new(
                iteration,
                "read_file",
                &args,
                Some(ActionEffect::Observe),
                outcome,
            ));
        }
    }

    fn intermediate_checkpoint(&self, state: &mut RunState) {
        let every = self.settings.checkpoint_every;
        if every == 0 || state.mutations_since_checkpoint < every {
            return;
        }
        let Some(vcs) = self.auto_checkpointer() else {
            return;
        };
        let message = format!(
            "corral: task {} checkpoint ({} files changed)",
            self.task.id, state.counters.files_changed
        );
        match vcs.checkpoint(&message) {
            Ok(tag) => {
                state.journal.record("checkpoint", format!("intermediate {}", tag));
                state.checkpoints.push(tag);
                state.mutations_since_checkpoint = 0;
            }
            Err(e) => warn!(task_id = %self.task.id, error = %e, "Intermediate checkpoint failed"),
        }
    }

    fn finalize(&self, state: &mut RunState, ending: Ending) -> TaskOutcome {
        let (status, reason, summary) = match ending {
            Ending::Done { summary } => {
                if let Some(vcs) = self.auto_checkpointer() {
                    let headline = summary.lines().next().unwrap_or_default();
                    match vcs.checkpoint(&format!("corral: done {}: {}", self.task.id, headline)) {
                        Ok(tag) => {
                            state.journal.record("checkpoint", format!("end {}", tag));
                            state.checkpoints.push(tag);
                        }
                        Err(e) => warn!(task_id = %self.task.id, error = %e, "End checkpoint failed"),
                    }
                }
                (TaskStatus::Succeeded, None, Some(summary))
            }
            Ending::Failed { reason, exhausted } => (TaskStatus::Failed, Some(self.unwind(state, reason, exhausted)), None),
        };

        state.journal.record(
            "finalize",
            match &reason {
                None => status.to_string(),
                Some(reason) => format!("{}: {}", status, reason),
            },
        );

        TaskOutcome {
            task_id: self.task.id.clone(),
            status,
            reason,
            summary,
            iterations: state.iterations,
            counters: state.counters,
            checkpoints: state.checkpoints.clone(),
            usage: state.usage,
        }
    }

    /// Roll back to the start checkpoint, first saving the discarded diff
    /// when the iteration budget ran out. Returns the final failure reason.
    fn unwind(&self, state: &mut RunState, mut reason: String, exhausted: bool) -> String {
        let (Some(vcs), Some(start)) = (&self.vcs, state.start_tag.clone()) else {
            return reason;
        };

        if exhausted && self.settings.preserve_partial_diff {
            match self.preserve_partial(vcs.as_ref(), &start) {
                Ok(Some(path)) => reason.push_str(&format!("; partial diff saved to {}", path.display())),
                Ok(None) => {}
                Err(e) => warn!(task_id = %self.task.id, error = %e, "Could not save partial diff"),
            }
        }

        match vcs.rollback_to(&start) {
            Ok(()) => {
                info!(task_id = %self.task.id, tag = %start, "Rolled back to start checkpoint");
                state.journal.record("rollback", format!("restored {}", start));
                state.checkpoints.retain(|tag| *tag == start);
            }
            Err(e) => {
                warn!(task_id = %self.task.id, error = %e, "Rollback failed");
                reason.push_str(&format!("; rollback failed: {}", e));
            }
        }
        reason
    }

    fn preserve_partial(&self, vcs: &dyn VersionControl, start: &str) -> Result<Option<PathBuf>, String> {
        let Some(dir) = &self.partial_dir else {
            return Ok(None);
        };
        let diff = vcs.diff_against(start).map_err(|e| e.to_string())?;
        if diff.trim().is_empty() {
            return Ok(None);
        }
        std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
        let path = dir.join(format!("{}.diff", short_id(&self.task.id)));
        std::fs::write(&path, diff).map_err(|e| e.to_string())?;
        Ok(Some(path))
    }

    fn cleanup(&self, state: &mut RunState) {
        if let Some(hygiene) = &self.hygiene {
            let report = hygiene.run_all();
            state.journal.record(
                "cleanup",
                format!(
                    "reaped {}, temps removed {}, log rotated {}, journals pruned {}, errors {}",
                    report.processes_reaped,
                    report.temps_removed,
                    report.log_rotated,
                    report.journals_pruned,
                    report.errors.len()
                ),
            );
        }
        if let Some(dir) = &self.journal_dir {
            match state.journal.export(dir) {
                Ok(path) => debug!(task_id = %self.task.id, path = %path.display(), "Journal written"),
                Err(e) => warn!(task_id = %self.task.id, error = %e, "Journal export failed"),
            }
        }
    }

    fn best_effort(&self, operation: &str, result: Result<(), StoreError>) {
        if let Err(e) = result {
            warn!(task_id = %self.task.id, operation, error = %e, "Task store call failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandOverride;
    use crate::llm::{ChatResponse, MockLlmClient};
    use crate::safety::ScriptedPrompter;
    use crate::sandbox::{CommandGate, FileJail, GateConfig, JailConfig};
    use crate::tools::{DoneTool, FsTool, ShellTool, TestRunnerTool};
    use tempfile::tempdir;

    fn call(id: &str, name: &str, args: Value) -> ChatResponse {
        ChatResponse::with_calls(vec![ToolInvocation::new(id, name, args)])
    }

    fn runner(dir: &tempfile::TempDir, llm: Arc<MockLlmClient>, test_command: &str, max_iterations: u32) -> TaskRunner {
        let settings = LoopSettings {
            retry: RetryPolicy::none(),
            ..Default::default()
        };
        runner_with(dir, llm, test_command, max_iterations, settings)
    }

    fn runner_with(
        dir: &tempfile::TempDir,
        llm: Arc<MockLlmClient>,
        test_command: &str,
        max_iterations: u32,
        settings: LoopSettings,
    ) -> TaskRunner {
        let jail = Arc::new(FileJail::new(dir.path(), JailConfig::default()).unwrap());
        let gate = Arc::new(CommandGate::new(jail.root(), GateConfig::default()));
        let tests = CommandOverride {
            command: Some(test_command.to_string()),
            timeout_secs: Some(10),
        };

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FsTool::new(jail.clone()))).unwrap();
        registry.register(Arc::new(ShellTool::new(gate.clone()))).unwrap();
        registry
            .register(Arc::new(TestRunnerTool::new(jail, gate, tests)))
            .unwrap();
        registry.register(Arc::new(DoneTool)).unwrap();

        let task = Task::new("Add subtract", dir.path())
            .with_mode(ApprovalMode::Auto)
            .with_max_iterations(max_iterations);
        let approval = ApprovalGate::new(ApprovalMode::Auto, Arc::new(ScriptedPrompter::new(vec![])));
        TaskRunner::new(task, settings, llm, Arc::new(registry), approval)
    }

    #[test]
    fn test_task_effective_mode() {
        let task = Task::new("x", "/w").with_mode(ApprovalMode::Auto);
        assert_eq!(task.effective_mode(), ApprovalMode::Auto);
        assert_eq!(task.with_spike(true).effective_mode(), ApprovalMode::Ask);
    }

    #[test]
    fn test_step_error_messages() {
        let err = StepError::Service(LlmError::Unreachable("refused".to_string()));
        assert!(err.to_string().starts_with("model service error:"));
        let err: StepError = ApprovalDenied::new("plan rejected").into();
        assert_eq!(err.to_string(), "Approval denied: plan rejected");
    }

    #[tokio::test]
    async fn test_plain_text_reply_gets_nudged() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_responses(vec![
            ChatResponse::text("I will add subtract."),
            call("c1", "run_tests", json!({})),
            call("c2", "done", json!({"summary": "ok"})),
        ]));
        let outcome = runner(&dir, llm.clone(), "true", 5).run().await;

        assert!(outcome.succeeded(), "{:?}", outcome.reason);
        let second = &llm.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.content, prompts::tool_use_nudge());
    }

    #[tokio::test]
    async fn test_reflection_injected_on_cadence() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        let llm = Arc::new(MockLlmClient::with_responses(vec![
            call("c1", "read_file", json!({"path": "a.txt"})),
            call("c2", "list_files", json!({})),
            call("c3", "run_tests", json!({})),
            call("c4", "read_file", json!({"path": "missing.txt"})),
            call("c5", "run_tests", json!({})),
            call("c6", "done", json!({"summary": "ok"})),
        ]));
        let settings = LoopSettings {
            reflect_every: 2,
            urgency_threshold: 5,
            retry: RetryPolicy::none(),
            ..Default::default()
        };
        let outcome = runner_with(&dir, llm.clone(), "true", 10, settings).run().await;
        assert!(outcome.succeeded(), "{:?}", outcome.reason);

        let requests = llm.requests();
        let is_reflection = |m: &Message| m.role == crate::llm::Role::User && m.content.starts_with("Progress check");
        let reflections: Vec<usize> = requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.messages.last().is_some_and(is_reflection))
            .map(|(i, _)| i)
            .collect();
        // iterations 3 and 5
        assert_eq!(reflections, vec![2, 4]);

        let third = requests[2].messages.last().unwrap();
        assert!(third.content.contains("iteration 3/10"));
        assert!(third.content.contains("read_file"));
        assert!(!third.content.contains("URGENT"));

        let fifth = requests[4].messages.last().unwrap();
        assert!(fifth.content.contains("URGENT: only 5 iterations remain"));
    }

    #[tokio::test]
    async fn test_reflection_disabled_at_zero() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_responses(vec![
            call("c1", "list_files", json!({})),
            call("c2", "list_files", json!({"path": "."})),
            call("c3", "run_tests", json!({})),
            call("c4", "done", json!({"summary": "ok"})),
        ]));
        let settings = LoopSettings {
            reflect_every: 0,
            retry: RetryPolicy::none(),
            ..Default::default()
        };
        let outcome = runner_with(&dir, llm.clone(), "true", 10, settings).run().await;
        assert!(outcome.succeeded(), "{:?}", outcome.reason);
        assert!(
            llm.requests()
                .iter()
                .flat_map(|r| r.messages.iter())
                .all(|m| !m.content.starts_with("Progress check"))
        );
    }

    #[tokio::test]
    async fn test_done_without_tests_is_rejected() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_responses(vec![
            call("c1", "done", json!({"summary": "too early"})),
            call("c2", "run_tests", json!({})),
            call("c3", "done", json!({"summary": "now"})),
        ]));
        let outcome = runner(&dir, llm.clone(), "true", 5).run().await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.summary.as_deref(), Some("now"));
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.counters.tests_run, 1);

        let rejection = &llm.requests()[1].messages;
        let tool_msg = rejection.last().unwrap();
        assert!(tool_msg.content.contains("done rejected"));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_results() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_responses(vec![
            call("c1", "read_file", json!({"path": "missing.py"})),
            call("c2", "list_files", json!({})),
        ]));
        let outcome = runner(&dir, llm, "true", 2).run().await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        let reason = outcome.reason.unwrap();
        assert!(reason.contains("iteration limit reached (2)"));
        assert!(reason.contains("read_file"));
    }

    #[tokio::test]
    async fn test_unknown_action_is_recoverable() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_responses(vec![
            call("c1", "teleport", json!({})),
            call("c2", "run_tests", json!({})),
            call("c3", "done", json!({"summary": "ok"})),
        ]));
        let outcome = runner(&dir, llm.clone(), "true", 5).run().await;
        assert!(outcome.succeeded());
        assert!(llm.requests()[1].messages.last().unwrap().content.contains("Unknown action: teleport"));
    }

    #[tokio::test]
    async fn test_model_failure_is_a_clean_termination() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(LlmError::Unreachable("connection refused".to_string()));
        let outcome = runner(&dir, llm, "true", 5).run().await;

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.reason.unwrap().starts_with("model service error:"));
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_edit_without_read_injects_content_after_tool_results() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
        let llm = Arc::new(MockLlmClient::with_responses(vec![
            ChatResponse::with_calls(vec![
                ToolInvocation::new("c1", "replace_in_file", json!({"path": "calc.py", "old": "a + b", "new": "b + a"})),
                ToolInvocation::new("c2", "list_files", json!({})),
            ]),
            call("c3", "run_tests", json!({})),
            call("c4", "done", json!({"summary": "ok"})),
        ]));
        let outcome = runner(&dir, llm.clone(), "true", 5).run().await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.counters.files_changed, 1);

        let messages = &llm.requests()[1].messages;
        let n = messages.len();
        assert_eq!(messages[n - 3].role, crate::llm::Role::Tool);
        assert_eq!(messages[n - 2].role, crate::llm::Role::Tool);
        assert!(messages[n - 1].content.contains("return a + b"));
    }
}
