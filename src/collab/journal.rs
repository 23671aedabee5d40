//! Human-readable run journal, exported as markdown during cleanup.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::id::short_id;

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub phase: String,
    pub detail: String,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone)]
pub struct Journal {
    task_id: String,
    objective: String,
    started_at: DateTime<Utc>,
    started: Instant,
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new(task_id: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            objective: objective.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, phase: &str, detail: impl Into<String>) {
        self.entries.push(JournalEntry {
            phase: phase.to_string(),
            detail: detail.into(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        });
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Task {}\n\n**Objective:** {}\n\n**Started:** {}\n",
            self.task_id,
            self.objective.trim(),
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let mut last_phase = "";
        for entry in &self.entries {
            if entry.phase != last_phase {
                let _ = write!(out, "\n## {}\n\n", entry.phase);
                last_phase = &entry.phase;
            }
            let _ = writeln!(out, "- `+{:.1}s` {}", entry.elapsed_secs, entry.detail.replace('\n', " "));
        }
        out
    }

    /// Write `<dir>/<short-task-id>.md`, creating `dir` when missing
    pub fn export(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.md", short_id(&self.task_id)));
        fs::write(&path, self.to_markdown())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_markdown_groups_consecutive_phases() {
        let mut journal = Journal::new("1738300800123-a1b2", "Add subtract");
        journal.record("init", "registry built");
        journal.record("iteration", "1: read_file ok");
        journal.record("iteration", "2: run_tests ok");
        journal.record("finalize", "succeeded");

        let md = journal.to_markdown();
        assert!(md.starts_with("# Task 1738300800123-a1b2"));
        assert_eq!(md.matches("## iteration").count(), 1);
        assert!(md.contains("2: run_tests ok"));
        assert_eq!(journal.entries().len(), 4);
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempdir().unwrap();
        let mut journal = Journal::new("1738300800123-a1b2", "x");
        journal.record("init", "multi\nline");
        let path = journal.export(&dir.path().join("journal")).unwrap();
        assert_eq!(path.file_name().unwrap(), "1738300800123-a1b2.md");
        assert!(fs::read_to_string(path).unwrap().contains("multi line"));
    }
}
