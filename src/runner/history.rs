//! ToolHistory - every dispatched invocation of one task, in order.
//!
//! Drives done-validation, stuck detection, the read-before-edit guard and
//! the summaries quoted in reflection prompts and failure reasons.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::tools::{ActionEffect, ToolOutcome};

const SUMMARY_ARG_CHARS: usize = 80;
const SUMMARY_RESULT_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub action: String,
    pub arguments: Value,
    pub effect: Option<ActionEffect>,
    pub outcome: ToolOutcome,
    pub signature: String,
}

impl HistoryEntry {
    pub fn new(iteration: u32, action: &str, arguments: &Value, effect: Option<ActionEffect>, outcome: ToolOutcome) -> Self {
        Self {
            iteration,
            action: action.to_string(),
            arguments: arguments.clone(),
            effect,
            signature: signature(arguments),
            outcome,
        }
    }

    fn path_arg(&self) -> Option<&str> {
        self.arguments.get("path").and_then(|p| p.as_str())
    }
}

/// sha256 hex of the canonical argument JSON, with string values trimmed.
///
/// `serde_json::Map` keeps keys sorted, so key order in the model's output
/// does not change the signature.
pub fn signature(arguments: &Value) -> String {
    let canonical = canonicalize(arguments).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect()),
        other => other.clone(),
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}

#[derive(Debug, Default, Clone)]
pub struct ToolHistory {
    entries: Vec<HistoryEntry>,
}

impl ToolHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last `window` entries share one action and one argument signature
    pub fn stuck(&self, window: usize) -> bool {
        if window == 0 || self.entries.len() < window {
            return false;
        }
        let tail = &self.entries[self.entries.len() - window..];
        let first = &tail[0];
        tail.iter()
            .all(|e| e.action == first.action && e.signature == first.signature)
    }

    /// Completion is allowed only when the most recent test run passed
    pub fn validate_done(&self) -> Result<(), String> {
        let last_test = self
            .entries
            .iter()
            .rev()
            .find(|e| e.effect == Some(ActionEffect::Test));

        match last_test {
            None => Err("No test run found in this session. Run run_tests and make sure it passes before calling done.".to_string()),
            Some(entry) if !entry.outcome.ok => {
                let detail = entry.outcome.error.as_deref().unwrap_or("tests failed");
                Err(format!(
                    "The most recent test run failed ({}). Fix the failures and run run_tests again before calling done.",
                    clip(detail, SUMMARY_RESULT_CHARS)
                ))
            }
            Some(_) => Ok(()),
        }
    }

    /// `path` was read successfully, or written wholesale, earlier in this session
    pub fn knows_content_of(&self, path: &str) -> bool {
        let wanted = path.trim_start_matches("./");
        self.entries.iter().any(|e| {
            e.outcome.ok
                && matches!(e.effect, Some(ActionEffect::Observe) | Some(ActionEffect::Write))
                && e.action != "list_files"
                && e.path_arg().map(|p| p.trim_start_matches("./")) == Some(wanted)
        })
    }

    /// One line per entry for the last `n` entries
    pub fn recent_summary(&self, n: usize) -> String {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..]
            .iter()
            .map(|e| {
                let status = if e.outcome.ok { "ok" } else { "FAILED" };
                let mut line = format!(
                    "- [{}] {}({}) -> {}",
                    e.iteration,
                    e.action,
                    clip(&e.arguments.to_string(), SUMMARY_ARG_CHARS),
                    status
                );
                if let Some(error) = &e.outcome.error {
                    line.push_str(": ");
                    line.push_str(&clip(error, SUMMARY_RESULT_CHARS));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rendered outcomes of the last `n` entries, oldest first
    pub fn last_results(&self, n: usize) -> Vec<String> {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..]
            .iter()
            .map(|e| format!("{}: {}", e.action, clip(&e.outcome.render(), SUMMARY_RESULT_CHARS)))
            .collect()
    }
}
