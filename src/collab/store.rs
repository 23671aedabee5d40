//! Task store - optional persistence of tasks, steps, tool calls and metrics.
//!
//! The loop treats every call as best-effort: errors are logged by the
//! caller and never change the course of a task.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub objective: String,
    pub workspace: String,
    pub approval_mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub task_id: String,
    pub iteration: u32,
    pub action: String,
    /// Redacted JSON arguments
    pub arguments: String,
    pub ok: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskMetrics {
    pub iterations: u32,
    pub tool_calls: u32,
    pub tests_run: u32,
    pub lint_runs: u32,
    pub files_changed: u32,
    pub violations: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

pub trait TaskStore: Send + Sync {
    fn create_task(&self, task: &TaskRecord) -> Result<(), StoreError>;

    fn update_task_status(&self, task_id: &str, status: &str, reason: Option<&str>) -> Result<(), StoreError>;

    fn append_step(&self, task_id: &str, iteration: u32, phase: &str, detail: &str) -> Result<(), StoreError>;

    fn log_tool_call(&self, call: &ToolCallRecord) -> Result<(), StoreError>;

    fn record_metrics(&self, task_id: &str, metrics: &TaskMetrics) -> Result<(), StoreError>;
}

/// Store that remembers nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl TaskStore for NullStore {
    fn create_task(&self, _task: &TaskRecord) -> Result<(), StoreError> {
        Ok(())
    }

    fn update_task_status(&self, _task_id: &str, _status: &str, _reason: Option<&str>) -> Result<(), StoreError> {
        Ok(())
    }

    fn append_step(&self, _task_id: &str, _iteration: u32, _phase: &str, _detail: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn log_tool_call(&self, _call: &ToolCallRecord) -> Result<(), StoreError> {
        Ok(())
    }

    fn record_metrics(&self, _task_id: &str, _metrics: &TaskMetrics) -> Result<(), StoreError> {
        Ok(())
    }
}

/// SQLite-backed store at `.corral/store.db`
pub struct SqliteTaskStore {
    db: Mutex<Connection>,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// SQLite integers are signed 64-bit; counters saturate at the top
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl SqliteTaskStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                operation: format!("create {}", parent.display()),
                source,
            })?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(db: &Connection) -> Result<(), StoreError> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                objective TEXT NOT NULL,
                workspace TEXT NOT NULL,
                approval_mode TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                reason TEXT,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL REFERENCES tasks(id),
                iteration INTEGER NOT NULL,
                phase TEXT NOT NULL,
                detail TEXT NOT NULL,
                created TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tool_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL REFERENCES tasks(id),
                iteration INTEGER NOT NULL,
                action TEXT NOT NULL,
                arguments TEXT NOT NULL,
                ok INTEGER NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                created TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metrics (
                task_id TEXT PRIMARY KEY REFERENCES tasks(id),
                iterations INTEGER NOT NULL,
                tool_calls INTEGER NOT NULL,
                tests_run INTEGER NOT NULL,
                lint_runs INTEGER NOT NULL,
                files_changed INTEGER NOT NULL,
                violations INTEGER NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                created TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_steps_task ON steps(task_id);
            CREATE INDEX IF NOT EXISTS idx_tool_calls_task ON tool_calls(task_id);
            "#,
        )?;
        Ok(())
    }

    /// `(status, reason)` of a task
    pub fn task_status(&self, task_id: &str) -> Result<Option<(String, Option<String>)>, StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let row = db
            .query_row(
                "SELECT status, reason FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Actions logged for a task, oldest first
    pub fn tool_calls(&self, task_id: &str) -> Result<Vec<(String, bool)>, StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = db.prepare("SELECT action, ok FROM tool_calls WHERE task_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![task_id], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn metrics(&self, task_id: &str) -> Result<Option<TaskMetrics>, StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let row = db
            .query_row(
                "SELECT iterations, tool_calls, tests_run, lint_runs, files_changed, violations,
                        prompt_tokens, completion_tokens
                 FROM metrics WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok(TaskMetrics {
                        iterations: row.get(0)?,
                        tool_calls: row.get(1)?,
                        tests_run: row.get(2)?,
                        lint_runs: row.get(3)?,
                        files_changed: row.get(4)?,
                        violations: row.get(5)?,
                        prompt_tokens: from_sql_int(row.get(6)?),
                        completion_tokens: from_sql_int(row.get(7)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

impl TaskStore for SqliteTaskStore {
    fn create_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let ts = now();
        db.execute(
            "INSERT OR REPLACE INTO tasks (id, objective, workspace, approval_mode, status, created, updated)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?5)",
            params![task.id, task.objective, task.workspace, task.approval_mode, ts],
        )?;
        Ok(())
    }

    fn update_task_status(&self, task_id: &str, status: &str, reason: Option<&str>) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "UPDATE tasks SET status = ?2, reason = ?3, updated = ?4 WHERE id = ?1",
            params![task_id, status, reason, now()],
        )?;
        Ok(())
    }

    fn append_step(&self, task_id: &str, iteration: u32, phase: &str, detail: &str) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "INSERT INTO steps (task_id, iteration, phase, detail, created) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![task_id, iteration, phase, detail, now()],
        )?;
        Ok(())
    }

    fn log_tool_call(&self, call: &ToolCallRecord) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "INSERT INTO tool_calls (task_id, iteration, action, arguments, ok, error, duration_ms, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                call.task_id,
                call.iteration,
                call.action,
                call.arguments,
                call.ok,
                call.error,
                to_sql_int(call.duration_ms),
                now(),
            ],
        )?;
        Ok(())
    }

    fn record_metrics(&self, task_id: &str, metrics: &TaskMetrics) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "INSERT OR REPLACE INTO metrics
             (task_id, iterations, tool_calls, tests_run, lint_runs, files_changed, violations,
              prompt_tokens, completion_tokens, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task_id,
                metrics.iterations,
                metrics.tool_calls,
                metrics.tests_run,
                metrics.lint_runs,
                metrics.files_changed,
                metrics.violations,
                to_sql_int(metrics.prompt_tokens),
                to_sql_int(metrics.completion_tokens),
                now(),
            ],
        )?;
        Ok(())
    }
}
