//! Git-backed checkpoints: tagged commits the loop can roll back to.

use log::{debug, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::id;
use crate::state::STATE_DIR_NAME;

pub const DEFAULT_TAG_PREFIX: &str = "corral-checkpoint-";

const FALLBACK_NAME: &str = "corral";
const FALLBACK_EMAIL: &str = "corral@localhost";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to execute git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Checkpoint not found: {0}")]
    UnknownTag(String),

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Undo surface the loop relies on
pub trait VersionControl: Send + Sync {
    /// Commit everything (even an empty diff) and tag it
    fn checkpoint(&self, message: &str) -> Result<String, CheckpointError>;

    /// Drop the newest checkpoint and reset to the one before it.
    /// Returns the tag now checked out, or `None` if there were none.
    fn rollback(&self) -> Result<Option<String>, CheckpointError>;

    /// Reset to `tag`, discarding every newer checkpoint
    fn rollback_to(&self, tag: &str) -> Result<(), CheckpointError>;

    fn has_uncommitted_changes(&self) -> Result<bool, CheckpointError>;

    /// Diff of the current tree against `tag`, untracked files included
    fn diff_against(&self, _tag: &str) -> Result<String, CheckpointError> {
        Ok(String::new())
    }
}

/// Checkpoints as lightweight tags on commits in the workspace repository
#[derive(Debug, Clone)]
pub struct GitCheckpointer {
    workspace: PathBuf,
    tag_prefix: String,
}

impl GitCheckpointer {
    pub fn new(workspace: impl Into<PathBuf>, tag_prefix: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            tag_prefix: tag_prefix.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn run_git(&self, args: &[&str]) -> Result<std::process::Output, CheckpointError> {
        debug!("git {}", args.join(" "));
        Command::new("git")
            .args(args)
            .current_dir(&self.workspace)
            .output()
            .map_err(CheckpointError::Spawn)
    }

    /// Run git, returning stdout or the stderr as an error
    fn git(&self, args: &[&str]) -> Result<String, CheckpointError> {
        let output = self.run_git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let command = args.iter().take(2).copied().collect::<Vec<_>>().join(" ");
            return Err(CheckpointError::Git { command, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn git_ok(&self, args: &[&str]) -> bool {
        self.run_git(args).map(|o| o.status.success()).unwrap_or(false)
    }

    /// Config flags for checkpoint commits: no signing prompts, and an
    /// identity when the user has none configured.
    fn commit_flags(&self) -> Vec<String> {
        let mut flags = vec!["-c".to_string(), "commit.gpgsign=false".to_string()];
        if !self.git_ok(&["config", "user.email"]) {
            flags.extend([
                "-c".to_string(),
                format!("user.name={FALLBACK_NAME}"),
                "-c".to_string(),
                format!("user.email={FALLBACK_EMAIL}"),
            ]);
        }
        flags
    }

    fn commit(&self, message: &str, allow_empty: bool) -> Result<(), CheckpointError> {
        let mut args = self.commit_flags();
        args.extend(["commit", "--no-verify", "-q", "-m", message].map(String::from));
        if allow_empty {
            args.push("--allow-empty".to_string());
        }
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git(&refs).map(|_| ())
    }

    /// True when the workspace is the top level of its own repository
    pub fn is_repo(&self) -> bool {
        let Ok(top) = self.git(&["rev-parse", "--show-toplevel"]) else {
            return false;
        };
        let top = PathBuf::from(top.trim());
        match (top.canonicalize(), self.workspace.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Initialize a repository with an initial commit if needed.
    /// Returns true when a repository was created.
    pub fn ensure_repo(&self) -> Result<bool, CheckpointError> {
        let created = if self.is_repo() {
            false
        } else {
            info!("Initializing git repository in {}", self.workspace.display());
            self.git(&["init", "-q"])?;
            true
        };

        self.exclude_state_dir()?;

        if !self.git_ok(&["rev-parse", "--verify", "-q", "HEAD"]) {
            self.git(&["add", "-A"])?;
            self.commit("Initial commit", true)?;
        }
        Ok(created)
    }

    /// Keep the state directory out of checkpoints so rollback never touches it
    fn exclude_state_dir(&self) -> Result<(), CheckpointError> {
        let info_dir = self.workspace.join(".git").join("info");
        let exclude = info_dir.join("exclude");
        let entry = format!("/{STATE_DIR_NAME}/");
        let current = fs::read_to_string(&exclude).unwrap_or_default();
        if current.lines().any(|l| l.trim() == entry) {
            return Ok(());
        }
        let io = |operation: &str| {
            let operation = operation.to_string();
            move |source| CheckpointError::Io { operation, source }
        };
        fs::create_dir_all(&info_dir).map_err(io("create .git/info"))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude)
            .map_err(io("open .git/info/exclude"))?;
        if !current.is_empty() && !current.ends_with('\n') {
            writeln!(file).map_err(io("write .git/info/exclude"))?;
        }
        writeln!(file, "{entry}").map_err(io("write .git/info/exclude"))
    }

    /// Checkpoint tags, newest first
    pub fn checkpoints(&self) -> Result<Vec<String>, CheckpointError> {
        let pattern = format!("{}*", self.tag_prefix);
        let out = self.git(&["tag", "-l", &pattern, "--sort=-refname"])?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }

    fn reset_hard(&self, target: &str) -> Result<(), CheckpointError> {
        self.git(&["reset", "--hard", "-q", target])?;
        self.git(&["clean", "-fdq"])?;
        Ok(())
    }

    fn delete_tag(&self, tag: &str) {
        if let Err(e) = self.git(&["tag", "-d", tag]) {
            warn!("Failed to delete checkpoint tag {}: {}", tag, e);
        }
    }

    pub fn diff_stat(&self) -> Result<String, CheckpointError> {
        self.git(&["diff", "--stat", "HEAD"])
    }

    pub fn diff(&self, path: Option<&str>) -> Result<String, CheckpointError> {
        match path {
            Some(p) => self.git(&["diff", "HEAD", "--", p]),
            None => self.git(&["diff", "HEAD"]),
        }
    }

    pub fn status_short(&self) -> Result<String, CheckpointError> {
        self.git(&["status", "--short"])
    }

    pub fn log_oneline(&self, count: usize) -> Result<String, CheckpointError> {
        let n = format!("-{}", count.max(1));
        self.git(&["log", "--oneline", "--decorate", &n])
    }
}

impl VersionControl for GitCheckpointer {
    fn checkpoint(&self, message: &str) -> Result<String, CheckpointError> {
        self.ensure_repo()?;
        self.git(&["add", "-A"])?;
        let dirty = !self.git(&["diff", "--cached", "--name-only"])?.trim().is_empty();
        self.commit(message, !dirty)?;

        let tag = id::checkpoint_tag(&self.tag_prefix);
        self.git(&["tag", &tag])?;
        info!("Checkpoint {} ({}): {}", tag, if dirty { "changes" } else { "empty" }, message);
        Ok(tag)
    }

    fn rollback(&self) -> Result<Option<String>, CheckpointError> {
        let tags = self.checkpoints()?;
        let Some(latest) = tags.first() else {
            warn!("Rollback requested but no checkpoints exist");
            return Ok(None);
        };
        let target = tags.get(1).unwrap_or(latest).clone();
        self.reset_hard(&target)?;
        self.delete_tag(latest);
        info!("Rolled back to {} (dropped {})", target, latest);
        Ok(Some(target))
    }

    fn rollback_to(&self, tag: &str) -> Result<(), CheckpointError> {
        let tags = self.checkpoints()?;
        let Some(pos) = tags.iter().position(|t| t == tag) else {
            return Err(CheckpointError::UnknownTag(tag.to_string()));
        };
        self.reset_hard(tag)?;
        for newer in &tags[..pos] {
            self.delete_tag(newer);
        }
        info!("Rolled back to {} (dropped {} newer)", tag, pos);
        Ok(())
    }

    fn has_uncommitted_changes(&self) -> Result<bool, CheckpointError> {
        Ok(!self.git(&["status", "--porcelain"])?.trim().is_empty())
    }

    fn diff_against(&self, tag: &str) -> Result<String, CheckpointError> {
        self.git(&["add", "-A"])?;
        self.git(&["diff", "--cached", "--binary", tag])
    }
}
