//! Workspace hygiene run after every task, whatever its outcome.
//!
//! Every step is best-effort: failures are collected in the report and
//! logged, never raised.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::config::CleanupConfig;
use crate::sandbox::CommandGate;
use crate::state::StateDir;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub processes_reaped: usize,
    pub temps_removed: usize,
    pub log_rotated: bool,
    pub journals_pruned: usize,
    pub errors: Vec<String>,
}

pub trait Hygiene: Send + Sync {
    fn run_all(&self) -> CleanupReport;
}

pub struct WorkspaceHygiene {
    state: StateDir,
    gate: Option<Arc<CommandGate>>,
    config: CleanupConfig,
}

fn older_than(path: &Path, max_age: Duration, now: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .map(|age| age > max_age)
        .unwrap_or(false)
}

fn rotated(log_file: &Path, n: usize) -> PathBuf {
    let mut name = log_file.as_os_str().to_os_string();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

impl WorkspaceHygiene {
    pub fn new(state: StateDir, config: CleanupConfig) -> Self {
        Self {
            state,
            gate: None,
            config,
        }
    }

    /// Reap the processes this gate abandoned on timeout
    pub fn with_gate(mut self, gate: Arc<CommandGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn reap_processes(&self) -> usize {
        self.gate.as_ref().map(|g| g.reap_abandoned()).unwrap_or(0)
    }

    /// Remove files in `tmp/` older than the configured age
    pub fn purge_temps(&self) -> std::io::Result<usize> {
        let max_age = Duration::from_secs(self.config.temp_max_age_hours * 3600);
        self.remove_older_than(&self.state.tmp_dir(), max_age, |_| true)
    }

    /// Remove journal markdown files older than the configured age
    pub fn prune_journals(&self) -> std::io::Result<usize> {
        let max_age = Duration::from_secs(self.config.journal_max_days * 86_400);
        self.remove_older_than(&self.state.journal_dir(), max_age, |p| {
            p.extension().map(|e| e == "md").unwrap_or(false)
        })
    }

    fn remove_older_than<F>(&self, dir: &Path, max_age: Duration, selected: F) -> std::io::Result<usize>
    where
        F: Fn(&Path) -> bool,
    {
        if !dir.is_dir() {
            return Ok(0);
        }
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && selected(&path) && older_than(&path, max_age, now) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Shift `corral.jsonl` to `.1` (and older rotations up by one) once it
    /// exceeds the size limit, keeping at most `log_keep` rotations
    pub fn rotate_logs(&self) -> std::io::Result<bool> {
        let log_file = self.state.log_file();
        let size = match fs::metadata(&log_file) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(false),
        };
        if size <= self.config.log_max_mb * 1024 * 1024 {
            return Ok(false);
        }

        let keep = self.config.log_keep.max(1);
        let oldest = rotated(&log_file, keep);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..keep).rev() {
            let src = rotated(&log_file, n);
            if src.exists() {
                fs::rename(&src, rotated(&log_file, n + 1))?;
            }
        }
        fs::rename(&log_file, rotated(&log_file, 1))?;
        log::info!("Rotated log file ({:.1}MB)", size as f64 / (1024.0 * 1024.0));
        Ok(true)
    }
}

impl Hygiene for WorkspaceHygiene {
    fn run_all(&self) -> CleanupReport {
        let mut report = CleanupReport {
            processes_reaped: self.reap_processes(),
            ..Default::default()
        };

        match self.purge_temps() {
            Ok(n) => report.temps_removed = n,
            Err(e) => report.errors.push(format!("purge_temps: {}", e)),
        }
        match self.rotate_logs() {
            Ok(rotated) => report.log_rotated = rotated,
            Err(e) => report.errors.push(format!("rotate_logs: {}", e)),
        }
        match self.prune_journals() {
            Ok(n) => report.journals_pruned = n,
            Err(e) => report.errors.push(format!("prune_journals: {}", e)),
        }

        for error in &report.errors {
            log::warn!("Cleanup step failed: {}", error);
        }
        report
    }
}
