//! Per-workspace state directory layout.
//!
//! ```text
//! <workspace>/.corral/
//!     config.yml
//!     logs/corral.jsonl      (+ corral.jsonl.1 .. .N rotations)
//!     tmp/                   scratch, purged by age
//!     journal/<task>.md      human-readable run journals
//!     partial/<task>.diff    work discarded by a failed run
//!     store.db               task store
//! ```

use std::io;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".corral";

#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(workspace: &Path) -> Self {
        Self {
            root: workspace.join(STATE_DIR_NAME),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("corral.jsonl")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("journal")
    }

    pub fn partial_dir(&self) -> PathBuf {
        self.root.join("partial")
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join("store.db")
    }

    /// Create every directory in the layout
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [self.logs_dir(), self.tmp_dir(), self.journal_dir(), self.partial_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let state = StateDir::new(Path::new("/work"));
        assert_eq!(state.root(), Path::new("/work/.corral"));
        assert_eq!(state.log_file(), PathBuf::from("/work/.corral/logs/corral.jsonl"));
        assert_eq!(state.config_path(), PathBuf::from("/work/.corral/config.yml"));
    }

    #[test]
    fn test_ensure_creates_directories() {
        let dir = tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.ensure().unwrap();
        assert!(state.tmp_dir().is_dir());
        assert!(state.journal_dir().is_dir());
        assert!(state.logs_dir().is_dir());
        assert!(state.partial_dir().is_dir());
    }
}
