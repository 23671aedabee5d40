//! FileJail - every file operation resolves through the workspace root.

use log::debug;
use regex::RegexBuilder;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::Violation;
use super::patch::{self, PatchError};

/// Directories never listed or searched
const SKIP_DIRS: &[&str] = &["node_modules", "target", "__pycache__", "venv", ".venv", ".tox", ".git"];

const MAX_LIST_ENTRIES: usize = 1_000;
const MAX_SEARCH_FILE_BYTES: u64 = 1_048_576;
const MAX_HIT_CHARS: usize = 200;
const PATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct JailConfig {
    pub max_read_chars: usize,
    pub max_search_results: usize,
    /// Try the system `patch` utility before the internal applier
    pub external_patch: bool,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            max_read_chars: 8_000,
            max_search_results: 50,
            external_patch: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchMethod {
    External,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub file: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum JailError {
    #[error(transparent)]
    Violation(#[from] Violation),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Patch failed for {path}: {source}")]
    Patch {
        path: String,
        #[source]
        source: PatchError,
    },

    #[error("Invalid search pattern: {0}")]
    Pattern(String),

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(operation: impl Into<String>) -> impl FnOnce(std::io::Error) -> JailError {
    let operation = operation.into();
    move |source| JailError::Io { operation, source }
}

/// Confines reads and writes to one workspace directory.
#[derive(Debug, Clone)]
pub struct FileJail {
    root: PathBuf,
    config: JailConfig,
}

impl FileJail {
    pub fn new(root: impl AsRef<Path>, config: JailConfig) -> Result<Self, JailError> {
        let given = root.as_ref();
        let root = given
            .canonicalize()
            .map_err(io_err(format!("canonicalize workspace {}", given.display())))?;
        if !root.is_dir() {
            return Err(JailError::NotFound(root.display().to_string()));
        }
        Ok(Self { root, config })
    }

    /// Canonical workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &JailConfig {
        &self.config
    }

    /// Resolve `path` to an absolute path inside the workspace.
    ///
    /// Rejects `..` that climbs above the root, absolute paths elsewhere,
    /// and anything whose real path (after symlinks) leaves the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, Violation> {
        let raw = Path::new(path.trim());
        let relative = if raw.is_absolute() {
            let normalized = normalize(raw).ok_or_else(|| Violation::Traversal { path: raw.to_path_buf() })?;
            normalized
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .map_err(|_| Violation::PathEscape {
                    path: raw.to_path_buf(),
                    workspace: self.root.clone(),
                })?
        } else {
            normalize(raw).ok_or_else(|| Violation::Traversal { path: raw.to_path_buf() })?
        };

        let real = self.real_path(&self.root.join(&relative)).ok_or_else(|| Violation::PathEscape {
            path: raw.to_path_buf(),
            workspace: self.root.clone(),
        })?;

        if real.starts_with(&self.root) {
            Ok(real)
        } else {
            Err(Violation::PathEscape {
                path: raw.to_path_buf(),
                workspace: self.root.clone(),
            })
        }
    }

    /// Canonicalize the longest existing ancestor and re-append the rest.
    /// A component that exists but cannot be canonicalized is a dangling
    /// symlink and yields `None`.
    fn real_path(&self, candidate: &Path) -> Option<PathBuf> {
        let mut existing = candidate.to_path_buf();
        let mut rest = Vec::new();
        loop {
            match existing.canonicalize() {
                Ok(mut real) => {
                    for part in rest.iter().rev() {
                        real.push(part);
                    }
                    return Some(real);
                }
                Err(_) => {
                    if fs::symlink_metadata(&existing).is_ok() {
                        return None;
                    }
                    rest.push(existing.file_name()?.to_os_string());
                    existing = existing.parent()?.to_path_buf();
                }
            }
        }
    }

    /// Path relative to the workspace, for display and model-facing output
    pub fn relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .unwrap_or(absolute)
            .to_string_lossy()
            .into_owned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Full file content
    pub fn read(&self, path: &str) -> Result<String, JailError> {
        let target = self.resolve(path)?;
        if !target.is_file() {
            return Err(JailError::NotFound(path.to_string()));
        }
        fs::read_to_string(&target).map_err(io_err(format!("read {path}")))
    }

    /// File content capped at `max_read_chars`, with a truncation marker
    pub fn read_truncated(&self, path: &str) -> Result<(String, bool), JailError> {
        let content = self.read(path)?;
        let total = content.chars().count();
        if total <= self.config.max_read_chars {
            return Ok((content, false));
        }
        let mut head: String = content.chars().take(self.config.max_read_chars).collect();
        head.push_str(&format!("\n... [truncated, {total} chars total]"));
        Ok((head, true))
    }

    /// Directory tree below `path`, skipping hidden and vendored directories.
    /// Directories carry a trailing `/`.
    pub fn list(&self, path: &str, max_depth: usize) -> Result<Vec<String>, JailError> {
        let start = self.resolve(path)?;
        if !start.is_dir() {
            return Err(JailError::NotFound(path.to_string()));
        }
        let mut entries = Vec::new();
        self.walk(&start, 1, max_depth.max(1), &mut entries)?;
        Ok(entries)
    }

    fn walk(&self, dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<String>) -> Result<(), JailError> {
        let mut children: Vec<_> = fs::read_dir(dir)
            .map_err(io_err(format!("list {}", self.relative(dir))))?
            .filter_map(|e| e.ok())
            .collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            if out.len() >= MAX_LIST_ENTRIES {
                return Ok(());
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || SKIP_DIRS.contains(&name.as_str()) {
                continue;
            }
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                out.push(format!("{}/", self.relative(&path)));
                if depth < max_depth {
                    self.walk(&path, depth + 1, max_depth, out)?;
                }
            } else {
                out.push(self.relative(&path));
            }
        }
        Ok(())
    }

    /// Case-insensitive regex search over files matching `glob_pattern`
    pub fn search(&self, pattern: &str, glob_pattern: Option<&str>) -> Result<Vec<SearchHit>, JailError> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| JailError::Pattern(e.to_string()))?;

        let glob_pattern = glob_pattern.filter(|g| !g.trim().is_empty()).unwrap_or("**/*");
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob_pattern.trim_start_matches('/')
        );
        let paths = glob::glob(&full).map_err(|e| JailError::Pattern(e.to_string()))?;

        let mut hits = Vec::new();
        for path in paths.filter_map(|p| p.ok()) {
            if hits.len() >= self.config.max_search_results {
                break;
            }
            let Ok(real) = path.canonicalize() else { continue };
            if !real.starts_with(&self.root) || !real.is_file() || self.is_skipped(&real) {
                continue;
            }
            if fs::metadata(&real).map(|m| m.len() > MAX_SEARCH_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(content) = fs::read_to_string(&real) else { continue };
            for (idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(SearchHit {
                        file: self.relative(&real),
                        line: idx + 1,
                        text: line.trim().chars().take(MAX_HIT_CHARS).collect(),
                    });
                    if hits.len() >= self.config.max_search_results {
                        break;
                    }
                }
            }
        }
        Ok(hits)
    }

    fn is_skipped(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .map(|rel| {
                rel.components().any(|c| {
                    let name = c.as_os_str().to_string_lossy();
                    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
                })
            })
            .unwrap_or(true)
    }

    /// Create a file that must not already exist
    pub fn write_new(&self, path: &str, content: &str) -> Result<PathBuf, JailError> {
        let target = self.resolve(path)?;
        if target.exists() {
            return Err(JailError::AlreadyExists(path.to_string()));
        }
        self.write_resolved(&target, path, content)?;
        Ok(target)
    }

    /// Create or replace a file
    pub fn overwrite(&self, path: &str, content: &str) -> Result<PathBuf, JailError> {
        let target = self.resolve(path)?;
        self.write_resolved(&target, path, content)?;
        Ok(target)
    }

    fn write_resolved(&self, target: &Path, path: &str, content: &str) -> Result<(), JailError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err(format!("create parent of {path}")))?;
        }
        fs::write(target, content).map_err(io_err(format!("write {path}")))
    }

    /// Unified diff between the file on disk (empty if absent) and `new_content`
    pub fn generate_diff(&self, path: &str, new_content: &str) -> Result<String, JailError> {
        let target = self.resolve(path)?;
        let current = if target.is_file() {
            fs::read_to_string(&target).map_err(io_err(format!("read {path}")))?
        } else {
            String::new()
        };
        Ok(patch::unified_diff(&self.relative(&target), &current, new_content))
    }

    /// Apply a unified diff to one file
    pub async fn apply_patch(&self, path: &str, diff: &str) -> Result<PatchMethod, JailError> {
        let target = self.resolve(path)?;

        if self.config.external_patch && target.is_file() {
            match external_patch(&self.root, &target, diff).await {
                Ok(true) => return Ok(PatchMethod::External),
                Ok(false) => debug!("patch utility rejected diff for {}, using internal applier", path),
                Err(e) => debug!("patch utility unavailable ({}), using internal applier", e),
            }
        }

        let original = if target.is_file() {
            fs::read_to_string(&target).map_err(io_err(format!("read {path}")))?
        } else {
            String::new()
        };
        let patched = patch::apply_unified_diff(&original, diff).map_err(|source| JailError::Patch {
            path: path.to_string(),
            source,
        })?;
        self.write_resolved(&target, path, &patched)?;
        Ok(PatchMethod::Internal)
    }

    /// Content of `path` after replacing the first verbatim `old` with `new`
    pub fn preview_replace(&self, path: &str, old: &str, new: &str) -> Result<String, JailError> {
        if old.is_empty() {
            return Err(JailError::Precondition("text to replace must not be empty".to_string()));
        }
        let content = self.read(path)?;
        if !content.contains(old) {
            return Err(JailError::Precondition(format!("text to replace not found verbatim in {path}")));
        }
        Ok(content.replacen(old, new, 1))
    }

    /// Replace the first verbatim occurrence of `old` with `new`
    pub fn replace_exact(&self, path: &str, old: &str, new: &str) -> Result<(), JailError> {
        let updated = self.preview_replace(path, old, new)?;
        let target = self.resolve(path)?;
        self.write_resolved(&target, path, &updated)
    }
}

/// Lexically normalize a path. `None` when `..` climbs above its start.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// Run the system `patch` against exactly `target`, dry-run first so a
/// failing diff never leaves a half-applied file.
async fn external_patch(root: &Path, target: &Path, diff: &str) -> std::io::Result<bool> {
    let mut body = diff.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    if !run_patch(root, target, &body, true).await? {
        return Ok(false);
    }
    run_patch(root, target, &body, false).await
}

async fn run_patch(root: &Path, target: &Path, diff: &str, dry_run: bool) -> std::io::Result<bool> {
    let mut cmd = Command::new("patch");
    cmd.args(["--batch", "--forward", "--silent", "--no-backup-if-mismatch", "-r", "-"]);
    if dry_run {
        cmd.arg("--dry-run");
    }
    let mut child = cmd
        .arg(target)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(diff.as_bytes()).await?;
    }

    match tokio::time::timeout(PATCH_TIMEOUT, child.wait()).await {
        Ok(status) => Ok(status?.success()),
        Err(_) => {
            debug!("patch timed out after {:?}", PATCH_TIMEOUT);
            let _ = child.kill().await;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn jail(dir: &Path) -> FileJail {
        FileJail::new(dir, JailConfig::default()).unwrap()
    }

    fn internal_jail(dir: &Path) -> FileJail {
        FileJail::new(
            dir,
            JailConfig {
                external_patch: false,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_relative_inside() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        let resolved = jail.resolve("src/main.rs").unwrap();
        assert!(resolved.starts_with(jail.root()));
        assert!(resolved.ends_with("src/main.rs"));
    }

    #[test]
    fn test_resolve_inner_parent_is_fine() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        let resolved = jail.resolve("src/../README.md").unwrap();
        assert_eq!(resolved, jail.root().join("README.md"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        for path in ["../outside.txt", "a/../../outside.txt", "./../x", ".."] {
            assert!(
                matches!(jail.resolve(path), Err(Violation::Traversal { .. })),
                "expected traversal for {path}"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_absolute_outside() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        assert!(matches!(jail.resolve("/etc/passwd"), Err(Violation::PathEscape { .. })));
    }

    #[test]
    fn test_resolve_accepts_absolute_inside() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        let inside = jail.root().join("file.txt");
        assert_eq!(jail.resolve(&inside.to_string_lossy()).unwrap(), inside);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let jail = jail(dir.path());
        assert!(matches!(jail.resolve("link/secret.txt"), Err(Violation::PathEscape { .. })));
        assert!(matches!(jail.resolve("link/new.txt"), Err(Violation::PathEscape { .. })));
        assert!(jail.read("link/secret.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_dangling_symlink() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink("/nonexistent/corral-target", dir.path().join("dangling")).unwrap();
        let jail = jail(dir.path());
        assert!(matches!(jail.resolve("dangling"), Err(Violation::PathEscape { .. })));
    }

    #[test]
    fn test_violation_performs_no_write() {
        let outer = tempdir().unwrap();
        let ws = outer.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let jail = jail(&ws);

        let err = jail.overwrite("../escaped.txt", "nope").unwrap_err();
        assert!(matches!(err, JailError::Violation(_)));
        assert!(!outer.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        assert!(matches!(jail.read("missing.txt"), Err(JailError::NotFound(_))));
    }

    #[test]
    fn test_read_truncated() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();
        let jail = FileJail::new(
            dir.path(),
            JailConfig {
                max_read_chars: 10,
                ..Default::default()
            },
        )
        .unwrap();
        let (content, truncated) = jail.read_truncated("big.txt").unwrap();
        assert!(truncated);
        assert!(content.starts_with("xxxxxxxxxx\n"));
        assert!(content.contains("100 chars total"));
    }

    #[test]
    fn test_write_new_refuses_existing() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        jail.write_new("a/b.txt", "one").unwrap();
        assert_eq!(jail.read("a/b.txt").unwrap(), "one");
        assert!(matches!(jail.write_new("a/b.txt", "two"), Err(JailError::AlreadyExists(_))));
        jail.overwrite("a/b.txt", "two").unwrap();
        assert_eq!(jail.read("a/b.txt").unwrap(), "two");
    }

    #[test]
    fn test_list_skips_hidden_and_vendored() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "").unwrap();
        std::fs::write(dir.path().join(".env"), "").unwrap();

        let jail = jail(dir.path());
        let entries = jail.list(".", 3).unwrap();
        assert!(entries.contains(&"src/".to_string()));
        assert!(entries.contains(&"src/lib.rs".to_string()));
        assert!(entries.contains(&"src/nested/deep.rs".to_string()));
        assert!(!entries.iter().any(|e| e.contains("node_modules") || e.starts_with('.')));

        let shallow = jail.list(".", 1).unwrap();
        assert_eq!(shallow, vec!["src/".to_string()]);
    }

    #[test]
    fn test_search_case_insensitive_with_glob() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def Add(a, b):\n    return a + b\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "add me\n").unwrap();

        let jail = jail(dir.path());
        let hits = jail.search("def add", Some("*.py")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "a.py");
        assert_eq!(hits[0].line, 1);

        let all = jail.search("add", None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_search_glob_cannot_escape() {
        let outer = tempdir().unwrap();
        let ws = outer.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        std::fs::write(outer.path().join("outside.txt"), "needle\n").unwrap();

        let jail = jail(&ws);
        let hits = jail.search("needle", Some("../*.txt")).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_invalid_regex() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        assert!(matches!(jail.search("(unclosed", None), Err(JailError::Pattern(_))));
    }

    #[test]
    fn test_replace_exact_first_occurrence() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "foo foo\n").unwrap();
        let jail = jail(dir.path());
        jail.replace_exact("f.txt", "foo", "bar").unwrap();
        assert_eq!(jail.read("f.txt").unwrap(), "bar foo\n");
    }

    #[test]
    fn test_replace_exact_missing_text_is_precondition() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "content\n").unwrap();
        let jail = jail(dir.path());
        let err = jail.replace_exact("f.txt", "absent", "x").unwrap_err();
        assert!(matches!(err, JailError::Precondition(_)));
        assert_eq!(jail.read("f.txt").unwrap(), "content\n");
    }

    #[tokio::test]
    async fn test_apply_patch_internal_multi_hunk() {
        let dir = tempdir().unwrap();
        let original: String = (1..=10).map(|n| format!("l{n}\n")).collect();
        std::fs::write(dir.path().join("f.txt"), &original).unwrap();
        let jail = internal_jail(dir.path());

        let diff = "--- a/f.txt\n+++ b/f.txt\n@@ -1,2 +1,1 @@\n-l1\n l2\n@@ -8,2 +7,4 @@\n l8\n+x\n+y\n l9\n";
        assert_eq!(jail.apply_patch("f.txt", diff).await.unwrap(), PatchMethod::Internal);
        assert_eq!(jail.read("f.txt").unwrap(), "l2\nl3\nl4\nl5\nl6\nl7\nl8\nx\ny\nl9\nl10\n");
    }

    #[tokio::test]
    async fn test_apply_patch_default_matches_diff() {
        // Whichever method applies, the result is the content the diff implies.
        let dir = tempdir().unwrap();
        let old = "alpha\nbeta\ngamma\n";
        let new = "alpha\nBETA\ngamma\ndelta\n";
        std::fs::write(dir.path().join("g.txt"), old).unwrap();
        let jail = jail(dir.path());
        let diff = jail.generate_diff("g.txt", new).unwrap();
        jail.apply_patch("g.txt", &diff).await.unwrap();
        assert_eq!(jail.read("g.txt").unwrap(), new);
    }

    #[tokio::test]
    async fn test_apply_patch_creates_new_file() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        let diff = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,2 @@\n+one\n+two\n";
        assert_eq!(jail.apply_patch("new.txt", diff).await.unwrap(), PatchMethod::Internal);
        assert_eq!(jail.read("new.txt").unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_apply_patch_rejects_escape() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        let err = jail.apply_patch("../x.txt", "@@ -0,0 +1 @@\n+x\n").await.unwrap_err();
        assert!(matches!(err, JailError::Violation(Violation::Traversal { .. })));
    }

    #[tokio::test]
    async fn test_rejected_diff_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("h.txt"), "one\ntwo\n").unwrap();
        let jail = jail(dir.path());
        let diff = "--- a/h.txt\n+++ b/h.txt\n@@ -1,2 +1,2 @@\n-uno\n+eins\n two\n";
        let err = jail.apply_patch("h.txt", diff).await.unwrap_err();
        assert!(matches!(err, JailError::Patch { .. }));
        assert_eq!(jail.read("h.txt").unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_generate_diff_for_new_file() {
        let dir = tempdir().unwrap();
        let jail = jail(dir.path());
        let diff = jail.generate_diff("n.txt", "hello\n").unwrap();
        assert!(diff.contains("+hello"));
    }
}
