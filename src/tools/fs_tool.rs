//! fs tool - jailed read, write, edit, search and listing

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ActionEffect, ActionSpec, Proposal, Tool, ToolError, ToolOutcome, optional_str, optional_u64, require_str};
use crate::sandbox::FileJail;

const DEFAULT_LIST_DEPTH: usize = 3;
const MAX_LISTED_FILES: usize = 200;

pub struct FsTool {
    jail: Arc<FileJail>,
}

impl FsTool {
    pub fn new(jail: Arc<FileJail>) -> Self {
        Self { jail }
    }

    fn read_file(&self, args: &Value) -> Result<ToolOutcome, ToolError> {
        let path = require_str(args, "path")?;
        let (content, truncated) = self.jail.read_truncated(path)?;
        Ok(ToolOutcome::success(json!({
            "path": path,
            "content": content,
            "truncated": truncated,
        })))
    }

    fn write_file(&self, args: &Value) -> Result<ToolOutcome, ToolError> {
        let path = require_str(args, "path")?;
        let content = require_str(args, "content")?;
        let create_only = args.get("create_only").and_then(|v| v.as_bool()).unwrap_or(false);

        let existed = self.jail.exists(path);
        if create_only {
            self.jail.write_new(path, content)?;
        } else {
            self.jail.overwrite(path, content)?;
        }
        Ok(ToolOutcome::success(json!({
            "path": path,
            "bytes": content.len(),
            "created": !existed,
        })))
    }

    async fn edit_file(&self, args: &Value) -> Result<ToolOutcome, ToolError> {
        let path = require_str(args, "path")?;
        let diff = require_str(args, "diff")?;
        if !self.jail.exists(path) {
            return Err(ToolError::NotFound(path.to_string()));
        }
        let method = self.jail.apply_patch(path, diff).await?;
        Ok(ToolOutcome::success(json!({ "path": path, "method": method })))
    }

    fn replace_in_file(&self, args: &Value) -> Result<ToolOutcome, ToolError> {
        let path = require_str(args, "path")?;
        let old = require_str(args, "old")?;
        let new = require_str(args, "new")?;
        self.jail.replace_exact(path, old, new)?;
        Ok(ToolOutcome::success(json!({ "path": path, "replaced": 1 })))
    }

    fn search(&self, args: &Value) -> Result<ToolOutcome, ToolError> {
        let pattern = require_str(args, "pattern")?;
        let glob = optional_str(args, "glob");
        let hits = self.jail.search(pattern, glob)?;
        let truncated = hits.len() >= self.jail.config().max_search_results;
        Ok(ToolOutcome::success(json!({
            "matches": hits,
            "count": hits.len(),
            "truncated": truncated,
        })))
    }

    fn list_files(&self, args: &Value) -> Result<ToolOutcome, ToolError> {
        let path = optional_str(args, "path").unwrap_or(".");
        let depth = optional_u64(args, "depth").map(|d| d as usize).unwrap_or(DEFAULT_LIST_DEPTH);
        let mut files = self.jail.list(path, depth)?;
        let truncated = files.len() > MAX_LISTED_FILES;
        files.truncate(MAX_LISTED_FILES);
        Ok(ToolOutcome::success(json!({ "files": files, "truncated": truncated })))
    }
}

#[async_trait]
impl Tool for FsTool {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn description(&self) -> &'static str {
        "Workspace-jailed file read/write/search/list operations"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new(
                "read_file",
                "Read a file (path relative to the workspace)",
                ActionEffect::Observe,
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path relative to the workspace"}
                    },
                    "required": ["path"]
                }),
            ),
            ActionSpec::new(
                "write_file",
                "Create or overwrite a file with the given content",
                ActionEffect::Write,
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path relative to the workspace"},
                        "content": {"type": "string", "description": "Complete new file content"},
                        "create_only": {"type": "boolean", "description": "Fail if the file already exists"}
                    },
                    "required": ["path", "content"]
                }),
            ),
            ActionSpec::new(
                "edit_file",
                "Apply a unified diff to an existing file",
                ActionEffect::Edit,
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path relative to the workspace"},
                        "diff": {"type": "string", "description": "Unified diff with @@ hunk headers"}
                    },
                    "required": ["path", "diff"]
                }),
            ),
            ActionSpec::new(
                "replace_in_file",
                "Replace the first exact occurrence of `old` with `new` in a file",
                ActionEffect::Edit,
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path relative to the workspace"},
                        "old": {"type": "string", "description": "Exact text to find, including whitespace"},
                        "new": {"type": "string", "description": "Replacement text"}
                    },
                    "required": ["path", "old", "new"]
                }),
            ),
            ActionSpec::new(
                "search",
                "Case-insensitive regex search across workspace files",
                ActionEffect::Observe,
                json!({
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string", "description": "Regular expression"},
                        "glob": {"type": "string", "description": "File glob, default **/*"}
                    },
                    "required": ["pattern"]
                }),
            ),
            ActionSpec::new(
                "list_files",
                "List the workspace file tree",
                ActionEffect::Observe,
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Directory to list, default workspace root"},
                        "depth": {"type": "integer", "description": "Maximum depth, default 3"}
                    }
                }),
            ),
        ]
    }

    async fn propose(&self, action: &str, args: &Value) -> Result<Option<Proposal>, ToolError> {
        let proposal = match action {
            "write_file" => {
                let path = require_str(args, "path")?;
                let diff = self.jail.generate_diff(path, require_str(args, "content")?)?;
                Proposal::Mutation {
                    path: path.to_string(),
                    diff,
                }
            }
            "edit_file" => {
                let path = require_str(args, "path")?;
                self.jail.resolve(path)?;
                Proposal::Mutation {
                    path: path.to_string(),
                    diff: require_str(args, "diff")?.to_string(),
                }
            }
            "replace_in_file" => {
                let path = require_str(args, "path")?;
                let updated = self
                    .jail
                    .preview_replace(path, require_str(args, "old")?, require_str(args, "new")?)?;
                Proposal::Mutation {
                    path: path.to_string(),
                    diff: self.jail.generate_diff(path, &updated)?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(proposal))
    }

    async fn execute(&self, action: &str, args: &Value) -> Result<ToolOutcome, ToolError> {
        match action {
            "read_file" => self.read_file(args),
            "write_file" => self.write_file(args),
            "edit_file" => self.edit_file(args).await,
            "replace_in_file" => self.replace_in_file(args),
            "search" => self.search(args),
            "list_files" => self.list_files(args),
            other => Err(ToolError::InvalidArgs(format!("Unknown fs action: {}", other))),
        }
    }

    async fn verify(&self) -> ToolOutcome {
        match self.jail.list(".", 1) {
            Ok(entries) => ToolOutcome::success(json!({ "tool": "fs", "files": entries.len() })),
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::JailConfig;
    use tempfile::tempdir;

    fn tool(dir: &tempfile::TempDir) -> FsTool {
        FsTool::new(Arc::new(FileJail::new(dir.path(), JailConfig::default()).unwrap()))
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let outcome = tool(&dir).execute("read_file", &json!({"path": "a.txt"})).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.get("content"), Some(&json!("hello")));
        assert_eq!(outcome.get("truncated"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = tool(&dir).execute("read_file", &json!({"path": "nope.txt"})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_outside_is_violation() {
        let dir = tempdir().unwrap();
        let err = tool(&dir)
            .execute("read_file", &json!({"path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Violation(_)));
    }

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let dir = tempdir().unwrap();
        let outcome = tool(&dir)
            .execute("write_file", &json!({"path": "src/new.py", "content": "x = 1\n"}))
            .await
            .unwrap();
        assert_eq!(outcome.get("created"), Some(&json!(true)));
        assert_eq!(std::fs::read_to_string(dir.path().join("src/new.py")).unwrap(), "x = 1\n");
    }

    #[tokio::test]
    async fn test_write_create_only_refuses_existing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let err = tool(&dir)
            .execute("write_file", &json!({"path": "a.txt", "content": "new", "create_only": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Precondition(_)));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_edit_file_applies_diff() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,3 +1,3 @@\n one\n-two\n+TWO\n three\n";

        let outcome = tool(&dir)
            .execute("edit_file", &json!({"path": "a.txt", "diff": diff}))
            .await
            .unwrap();
        assert!(outcome.ok);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\nTWO\nthree\n");
    }

    #[tokio::test]
    async fn test_replace_missing_text_is_precondition() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc").unwrap();
        let err = tool(&dir)
            .execute("replace_in_file", &json!({"path": "a.txt", "old": "zzz", "new": "y"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_propose_replace_shows_diff_without_writing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc\n").unwrap();
        let proposal = tool(&dir)
            .propose("replace_in_file", &json!({"path": "a.txt", "old": "abc", "new": "xyz"}))
            .await
            .unwrap()
            .unwrap();

        match proposal {
            Proposal::Mutation { path, diff } => {
                assert_eq!(path, "a.txt");
                assert!(diff.contains("-abc"));
                assert!(diff.contains("+xyz"));
            }
            other => panic!("unexpected proposal {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "abc\n");
    }

    #[tokio::test]
    async fn test_search_and_list() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
        let fs_tool = tool(&dir);

        let found = fs_tool
            .execute("search", &json!({"pattern": "def ADD", "glob": "*.py"}))
            .await
            .unwrap();
        assert_eq!(found.get("count"), Some(&json!(1)));

        let listed = fs_tool.execute("list_files", &json!({})).await.unwrap();
        assert_eq!(listed.get("files"), Some(&json!(["calc.py"])));
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let dir = tempdir().unwrap();
        let err = tool(&dir).execute("write_file", &json!({"path": "a"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
