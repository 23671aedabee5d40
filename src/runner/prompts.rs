//! Prompt text fed to the model at each phase of a task.

use std::fmt::Write;

/// `(tool, action, description)` as produced by `ToolRegistry::list_actions`
pub type Catalogue<'a> = [(&'a str, &'a str, &'a str)];

pub fn system_prompt(catalogue: &Catalogue<'_>, workspace: &str, spike: bool) -> String {
    let mut prompt = format!(
        "You are corral, a coding agent working inside the workspace `{}`.\n\
         You complete tasks by calling tools. Every path you pass is relative to the workspace root.\n\n",
        workspace
    );

    prompt.push_str("## Tools\n");
    let mut current_tool = "";
    for (tool, action, description) in catalogue {
        if *tool != current_tool {
            let _ = writeln!(prompt, "{}:", tool);
            current_tool = tool;
        }
        let _ = writeln!(prompt, "  - {}: {}", action, description);
    }

    prompt.push_str(
        "\n## Working rules\n\
         1. Explore before changing anything: list_files, read_file, search.\n\
         2. Read a file before you edit it. Prefer replace_in_file for small edits.\n\
         3. Make one logical change at a time and keep it minimal. Match the existing style.\n\
         4. Run run_tests after every meaningful change.\n\
         5. When a call fails, read the error. Never repeat an identical call that already failed.\n\
         6. Stay inside the workspace. Destructive or privileged commands are blocked.\n\
         7. Call done(summary) only after run_tests passes and the task is fully met.\n",
    );

    if spike {
        prompt.push_str(
            "\n## Spike mode\n\
             Confidence in this kind of task is low. Take the smallest possible steps, \
             run the tests after each one, and read more context before every edit.\n",
        );
    }
    prompt
}

pub fn task_message(objective: &str, files: &str) -> String {
    let mut message = format!("## Task\n{}\n", objective.trim());
    if !files.trim().is_empty() {
        let _ = write!(message, "\n## Workspace files\n{}\n", files.trim_end());
    }
    message
}

pub fn planning_request() -> String {
    "Before making any change, write a short numbered plan: which files you will read, \
     what you will change, and how you will verify it. Do not call tools yet."
        .to_string()
}

pub fn plan_approved() -> String {
    "The plan is approved. Carry it out now using the tools.".to_string()
}

pub fn reflection(iteration: u32, max_iterations: u32, summary: &str, urgency_threshold: u32) -> String {
    let remaining = max_iterations.saturating_sub(iteration);
    let summary = if summary.trim().is_empty() {
        "(no tool calls yet)"
    } else {
        summary
    };
    let mut prompt = format!(
        "Progress check, iteration {}/{}.\n\nRecent actions:\n{}\n\n\
         Take stock before continuing:\n\
         - Is the task closer to done than it was?\n\
         - Did a call fail? If so, try a different approach instead of repeating it.\n\
         - What single step matters most now?",
        iteration, max_iterations, summary
    );
    if remaining <= urgency_threshold {
        let _ = write!(
            prompt,
            "\n\nURGENT: only {} iterations remain. Take the most direct path to passing tests and done.",
            remaining
        );
    }
    prompt
}

pub fn stuck_nudge(action: &str, count: usize) -> String {
    format!(
        "You have called '{action}' {count} times in a row with the same arguments and it is not helping. \
         Try a different approach: re-read the file you are changing, read the full error output, \
         or search for the right location. Do not call '{action}' with these arguments again."
    )
}

pub fn tool_use_nudge() -> String {
    "Reply with a tool call. Use the tools to make progress, and call done(summary) \
     once the tests pass."
        .to_string()
}

pub fn done_rejection(reason: &str) -> String {
    format!("done rejected: {}", reason)
}

pub fn auto_read_note(path: &str, content: &str) -> String {
    format!(
        "You edited `{}` without reading it first. Its content before that edit was:\n```\n{}\n```\n\
         Check that your edit still fits it.",
        path, content
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_catalogue() {
        let catalogue = [
            ("fs", "read_file", "Read a file"),
            ("fs", "write_file", "Write a file"),
            ("done", "done", "Finish"),
        ];
        let prompt = system_prompt(&catalogue, "/work", false);
        assert!(prompt.contains("fs:\n  - read_file: Read a file\n  - write_file"));
        assert!(prompt.contains("done:"));
        assert!(prompt.contains("/work"));
        assert!(!prompt.contains("Spike mode"));
    }

    #[test]
    fn test_spike_section() {
        let prompt = system_prompt(&[], "/work", true);
        assert!(prompt.contains("Spike mode"));
    }

    #[test]
    fn test_reflection_urgency() {
        let relaxed = reflection(5, 25, "- read_file -> ok", 5);
        assert!(relaxed.contains("different approach"));
        assert!(!relaxed.contains("URGENT"));

        let urgent = reflection(21, 25, "", 5);
        assert!(urgent.contains("URGENT: only 4 iterations remain"));
        assert!(urgent.contains("(no tool calls yet)"));
    }

    #[test]
    fn test_task_message() {
        let message = task_message("Add subtract", "calc.py\n");
        assert!(message.contains("Add subtract"));
        assert!(message.contains("## Workspace files\ncalc.py"));
        assert!(!task_message("x", "").contains("Workspace files"));
    }

    #[test]
    fn test_nudges_mention_action() {
        assert!(stuck_nudge("read_file", 3).contains("'read_file' 3 times"));
        assert!(done_rejection("tests failed").starts_with("done rejected"));
        assert!(auto_read_note("a.py", "x = 1").contains("x = 1"));
    }
}
