//! CommandGate - denylist screening and time-boxed shell execution.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use super::Violation;
use crate::redact::redact;

/// Built-in denylist, matched as lower-case substrings in order
pub const DEFAULT_DENYLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "rm -rf .",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "init 0",
    "init 6",
    "systemctl stop",
    "systemctl disable",
    "sudo ",
    "chmod -r 777",
    "chown -r",
    "curl|bash",
    "curl | bash",
    "curl|sh",
    "curl | sh",
    "wget|bash",
    "wget | bash",
    "wget|sh",
    "wget | sh",
    "| bash",
    "| sh -",
    ":(){ :|:& };:",
    "fork bomb",
    "iptables -f",
    "iptables --flush",
];

/// Exit code reported when a command exceeds its timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported when the shell could not be started
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -2;

const TRUNCATION_MARKER: &str = "\n... [truncated]";

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub timeout: Duration,
    /// Cap applied to stdout and stderr independently
    pub max_output_bytes: usize,
    pub denylist: Vec<String>,
    pub allowlist: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_output_bytes: 50_000,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_secs: f64,
    pub truncated: bool,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub command: String,
    pub exit_code: i32,
    pub duration_secs: f64,
    pub at: DateTime<Utc>,
}

/// Runs shell commands inside one workspace. History is per gate, so one
/// gate belongs to one task.
pub struct CommandGate {
    workspace: PathBuf,
    config: GateConfig,
    history: Mutex<Vec<ExecutionRecord>>,
    abandoned: Mutex<Vec<Child>>,
}

impl CommandGate {
    pub fn new(workspace: impl Into<PathBuf>, config: GateConfig) -> Self {
        Self {
            workspace: workspace.into(),
            config,
            history: Mutex::new(Vec::new()),
            abandoned: Mutex::new(Vec::new()),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Screen a command. An allowlist hit wins over any denylist hit.
    pub fn check(&self, command: &str) -> Result<(), Violation> {
        let lowered = command.trim().to_lowercase();

        let allowed = self
            .config
            .allowlist
            .iter()
            .any(|a| !a.is_empty() && lowered.contains(&a.to_lowercase()));
        if allowed {
            return Ok(());
        }

        match self
            .config
            .denylist
            .iter()
            .find(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
        {
            Some(pattern) => Err(Violation::DeniedCommand {
                command: redact(command),
                pattern: pattern.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Run with the configured timeout
    pub async fn run(
        &self,
        command: &str,
        env: Option<&HashMap<String, String>>,
    ) -> Result<CommandResult, Violation> {
        self.run_with_timeout(command, env, self.config.timeout).await
    }

    /// Run `command` via `sh -c` in the workspace.
    ///
    /// A denylisted command returns `Err` without spawning anything. Timeouts
    /// and spawn failures are reported in the result via the sentinel exit
    /// codes, never as errors.
    pub async fn run_with_timeout(
        &self,
        command: &str,
        env: Option<&HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<CommandResult, Violation> {
        if let Err(violation) = self.check(command) {
            warn!("Blocked command: {}", violation);
            return Err(violation);
        }

        let started = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env) = env {
            cmd.envs(env);
        }

        let result = match cmd.spawn() {
            Ok(child) => self.wait_for(command, child, started, timeout).await,
            Err(e) => CommandResult {
                command: command.to_string(),
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("Failed to start command: {e}"),
                duration_secs: started.elapsed().as_secs_f64(),
                truncated: false,
                timed_out: false,
            },
        };

        info!(
            "Command exit={} in {:.2}s: {}",
            result.exit_code,
            result.duration_secs,
            redact(command)
        );
        self.record(&result);
        Ok(result)
    }

    async fn wait_for(&self, command: &str, mut child: Child, started: Instant, timeout: Duration) -> CommandResult {
        let cap = self.config.max_output_bytes;
        let out_task = tokio::spawn(read_capped(child.stdout.take(), cap));
        let err_task = tokio::spawn(read_capped(child.stderr.take(), cap));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // Background grandchildren may hold the pipes open; do not wait on them forever.
                let drain = timeout
                    .saturating_sub(started.elapsed())
                    .max(Duration::from_millis(200));
                let (stdout, out_truncated) = tokio::time::timeout(drain, out_task)
                    .await
                    .ok()
                    .and_then(|r| r.ok())
                    .unwrap_or_default();
                let (stderr, err_truncated) = tokio::time::timeout(drain, err_task)
                    .await
                    .ok()
                    .and_then(|r| r.ok())
                    .unwrap_or_default();

                CommandResult {
                    command: command.to_string(),
                    exit_code: exit_code(status),
                    stdout: finish_stream(stdout, out_truncated),
                    stderr: finish_stream(stderr, err_truncated),
                    duration_secs: started.elapsed().as_secs_f64(),
                    truncated: out_truncated || err_truncated,
                    timed_out: false,
                }
            }
            Ok(Err(e)) => CommandResult {
                command: command.to_string(),
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("Failed to wait for command: {e}"),
                duration_secs: started.elapsed().as_secs_f64(),
                truncated: false,
                timed_out: false,
            },
            Err(_) => {
                out_task.abort();
                err_task.abort();
                warn!("Command timed out after {}s, abandoning: {}", timeout.as_secs(), redact(command));
                self.abandoned.lock().unwrap_or_else(|e| e.into_inner()).push(child);
                CommandResult {
                    command: command.to_string(),
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("Command timed out after {}s", timeout.as_secs()),
                    duration_secs: started.elapsed().as_secs_f64(),
                    truncated: false,
                    timed_out: true,
                }
            }
        }
    }

    fn record(&self, result: &CommandResult) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ExecutionRecord {
                command: redact(&result.command),
                exit_code: result.exit_code,
                duration_secs: result.duration_secs,
                at: Utc::now(),
            });
    }

    /// Snapshot of every command run through this gate
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of timed-out processes still held
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Best-effort kill of processes abandoned on timeout.
    /// Returns how many were still running.
    pub fn reap_abandoned(&self) -> usize {
        let mut abandoned = self.abandoned.lock().unwrap_or_else(|e| e.into_inner());
        let mut killed = 0;
        for mut child in abandoned.drain(..) {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    if child.start_kill().is_ok() {
                        killed += 1;
                    }
                }
            }
        }
        killed
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool) {
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}

fn finish_stream(mut bytes: Vec<u8>, truncated: bool) -> String {
    if truncated {
        trim_partial_char(&mut bytes);
    }
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

/// Drop a multi-byte UTF-8 sequence the cap cut in half
fn trim_partial_char(bytes: &mut Vec<u8>) {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        if width > back {
            bytes.truncate(len - back);
        }
        return;
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(TIMEOUT_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(TIMEOUT_EXIT_CODE)
}
