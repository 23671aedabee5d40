//! ApprovalGate - auto / ask / paranoid confirmation policy.

use colored::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Everything passes without prompting
    Auto,
    /// Plan is confirmed once; mutations and commands are shown, not asked
    #[default]
    Ask,
    /// Plan, every mutation, and every command are confirmed individually
    Paranoid,
}

impl ApprovalMode {
    /// Spike mode never runs unattended
    pub fn with_spike(self, spike: bool) -> Self {
        match (self, spike) {
            (ApprovalMode::Auto, true) => ApprovalMode::Ask,
            (mode, _) => mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Auto => "auto",
            ApprovalMode::Ask => "ask",
            ApprovalMode::Paranoid => "paranoid",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ApprovalMode::Auto),
            "ask" => Ok(ApprovalMode::Ask),
            "paranoid" => Ok(ApprovalMode::Paranoid),
            other => Err(format!("unknown approval mode '{other}' (expected auto, ask, or paranoid)")),
        }
    }
}

/// A human said no.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Approval denied: {subject}")]
pub struct ApprovalDenied {
    pub subject: String,
}

impl ApprovalDenied {
    pub fn new(subject: impl Into<String>) -> Self {
        Self { subject: subject.into() }
    }
}

/// Where approval questions go
pub trait Prompter: Send + Sync {
    /// Display something for visibility only
    fn show(&self, title: &str, body: &str);

    /// Ask a yes/no question; blocks until answered
    fn confirm(&self, question: &str) -> bool;
}

/// Terminal prompter: writes to stderr, reads stdin
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn show(&self, title: &str, body: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "\n{}", title.cyan().bold());
        let _ = writeln!(err, "{}", colorize_diff(body));
    }

    fn confirm(&self, question: &str) -> bool {
        let stdin = std::io::stdin();
        loop {
            {
                let mut err = std::io::stderr().lock();
                let _ = write!(err, "{} {} ", question.yellow().bold(), "[y/n]".dimmed());
                let _ = err.flush();
            }
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return false,
                Ok(_) => match line.trim().to_lowercase().as_str() {
                    "y" | "yes" => return true,
                    "n" | "no" => return false,
                    _ => eprintln!("Please answer y or n."),
                },
            }
        }
    }
}

fn colorize_diff(body: &str) -> String {
    body.lines()
        .map(|line| {
            if line.starts_with("+++") || line.starts_with("---") {
                line.bold().to_string()
            } else if line.starts_with('+') {
                line.green().to_string()
            } else if line.starts_with('-') {
                line.red().to_string()
            } else if line.starts_with("@@") {
                line.cyan().to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompter with canned answers. Records every interaction.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    questions: Mutex<Vec<String>>,
    shown: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn show(&self, title: &str, _body: &str) {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(title.to_string());
    }

    fn confirm(&self, question: &str) -> bool {
        self.questions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(question.to_string());
        // Running out of answers means "no"
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(false)
    }
}

/// Policy gate in front of plans, file mutations, and commands
#[derive(Clone)]
pub struct ApprovalGate {
    mode: ApprovalMode,
    prompter: Arc<dyn Prompter>,
}

impl ApprovalGate {
    pub fn new(mode: ApprovalMode, prompter: Arc<dyn Prompter>) -> Self {
        Self { mode, prompter }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    pub fn approve_plan(&self, plan: &str) -> Result<(), ApprovalDenied> {
        if self.mode == ApprovalMode::Auto {
            return Ok(());
        }
        self.prompter.show("Proposed plan", plan);
        if self.prompter.confirm("Approve this plan?") {
            info!("Plan approved");
            Ok(())
        } else {
            Err(ApprovalDenied::new("plan rejected"))
        }
    }

    pub fn approve_mutation(&self, path: &str, diff: &str) -> Result<(), ApprovalDenied> {
        match self.mode {
            ApprovalMode::Auto => Ok(()),
            ApprovalMode::Ask => {
                self.prompter.show(&format!("Change to {path}"), diff);
                Ok(())
            }
            ApprovalMode::Paranoid => {
                self.prompter.show(&format!("Change to {path}"), diff);
                if self.prompter.confirm(&format!("Apply change to {path}?")) {
                    Ok(())
                } else {
                    Err(ApprovalDenied::new(format!("change to {path}")))
                }
            }
        }
    }

    pub fn approve_command(&self, command: &str) -> Result<(), ApprovalDenied> {
        match self.mode {
            ApprovalMode::Auto => Ok(()),
            ApprovalMode::Ask => {
                self.prompter.show("Running command", command);
                Ok(())
            }
            ApprovalMode::Paranoid => {
                self.prompter.show("Command", command);
                if self.prompter.confirm(&format!("Run `{command}`?")) {
                    Ok(())
                } else {
                    Err(ApprovalDenied::new(format!("command `{command}`")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(mode: ApprovalMode, answers: Vec<bool>) -> (ApprovalGate, Arc<ScriptedPrompter>) {
        let prompter = Arc::new(ScriptedPrompter::new(answers));
        (ApprovalGate::new(mode, prompter.clone()), prompter)
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("AUTO".parse::<ApprovalMode>().unwrap(), ApprovalMode::Auto);
        assert_eq!("paranoid".parse::<ApprovalMode>().unwrap(), ApprovalMode::Paranoid);
        assert!("yolo".parse::<ApprovalMode>().is_err());
        assert_eq!(ApprovalMode::Ask.to_string(), "ask");
    }

    #[test]
    fn test_mode_serde_lowercase() {
        let json = serde_json::to_string(&ApprovalMode::Paranoid).unwrap();
        assert_eq!(json, "\"paranoid\"");
    }

    #[test]
    fn test_spike_upgrades_auto_only() {
        assert_eq!(ApprovalMode::Auto.with_spike(true), ApprovalMode::Ask);
        assert_eq!(ApprovalMode::Auto.with_spike(false), ApprovalMode::Auto);
        assert_eq!(ApprovalMode::Paranoid.with_spike(true), ApprovalMode::Paranoid);
    }

    #[test]
    fn test_auto_never_prompts() {
        let (gate, prompter) = gate(ApprovalMode::Auto, vec![]);
        assert!(gate.approve_plan("do things").is_ok());
        assert!(gate.approve_mutation("a.txt", "+x").is_ok());
        assert!(gate.approve_command("rm thing").is_ok());
        assert!(prompter.questions().is_empty());
        assert!(prompter.shown().is_empty());
    }

    #[test]
    fn test_ask_prompts_for_plan_only() {
        let (gate, prompter) = gate(ApprovalMode::Ask, vec![true]);
        assert!(gate.approve_plan("plan").is_ok());
        assert!(gate.approve_mutation("a.txt", "+x").is_ok());
        assert!(gate.approve_command("make").is_ok());
        assert_eq!(prompter.questions().len(), 1);
        assert_eq!(prompter.shown().len(), 3);
    }

    #[test]
    fn test_plan_rejection_is_denied() {
        let (gate, _) = gate(ApprovalMode::Ask, vec![false]);
        let err = gate.approve_plan("plan").unwrap_err();
        assert_eq!(err.subject, "plan rejected");
    }

    #[test]
    fn test_paranoid_prompts_each_category() {
        let (gate, prompter) = gate(ApprovalMode::Paranoid, vec![true, true, false]);
        assert!(gate.approve_plan("plan").is_ok());
        assert!(gate.approve_mutation("a.txt", "+x").is_ok());
        let err = gate.approve_command("make").unwrap_err();
        assert!(err.to_string().contains("make"));
        assert_eq!(prompter.questions().len(), 3);
    }

    #[test]
    fn test_colorize_diff_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(colorize_diff("+a\n-b\n c"), "+a\n-b\n c");
    }
}
