//! done tool - the terminal completion signal
//!
//! Executing it only echoes the summary. Whether the task actually ends is
//! the loop's decision, after done-validation.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ActionEffect, ActionSpec, Tool, ToolError, ToolOutcome, optional_str};

pub struct DoneTool;

#[async_trait]
impl Tool for DoneTool {
    fn name(&self) -> &'static str {
        "done"
    }

    fn description(&self) -> &'static str {
        "Signal task completion"
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec::new(
            "done",
            "Signal that the task is complete. Only accepted after a passing run_tests.",
            ActionEffect::Finish,
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "Brief summary of what was accomplished"}
                },
                "required": ["summary"]
            }),
        )]
    }

    async fn execute(&self, _action: &str, args: &Value) -> Result<ToolOutcome, ToolError> {
        let summary = optional_str(args, "summary").unwrap_or("(no summary)");
        Ok(ToolOutcome::success(json!({ "summary": summary })))
    }
}
