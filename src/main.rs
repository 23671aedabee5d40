use chrono::Utc;
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use corral::collab::{Preflight, PreflightReport, WorkspacePreflight};
use corral::config::Config;
use corral::llm::{LlmClient, OpenAiClient};
use corral::redact::redact;
use corral::runner::{Task, TaskOutcome, assemble};
use corral::safety::{ConsolePrompter, GitCheckpointer, VersionControl};
use corral::sandbox::{CommandGate, FileJail};
use corral::state::StateDir;
use corral::tools::build_registry;

mod cli;

use cli::{Cli, Commands};

/// JSON lines `{ts, level, target, msg}` appended to `.corral/logs/corral.jsonl`
fn setup_logging(workspace: &Path, level: &str, verbose: bool) -> Result<()> {
    let state = StateDir::new(workspace);
    fs::create_dir_all(state.logs_dir()).context("Failed to create log directory")?;

    let log_file = state.log_file();
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let level = if verbose { "debug" } else { level };
    env_logger::Builder::new()
        .parse_filters(level)
        .parse_default_env()
        .format(|buf, record| {
            let line = serde_json::json!({
                "ts": Utc::now().to_rfc3339(),
                "level": record.level().to_string(),
                "target": record.target(),
                "msg": redact(&record.args().to_string()),
            });
            writeln!(buf, "{}", line)
        })
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn print_outcome(outcome: &TaskOutcome) {
    if outcome.succeeded() {
        println!("{} task {}", "Succeeded:".green().bold(), outcome.task_id);
        if let Some(summary) = &outcome.summary {
            println!("  {}", summary);
        }
    } else {
        println!("{} task {}", "Failed:".red().bold(), outcome.task_id);
        if let Some(reason) = &outcome.reason {
            println!("  {}", reason);
        }
    }
    let c = &outcome.counters;
    println!(
        "  {} iterations, {} tool calls, {} test runs, {} lint runs, {} files changed, {} violations",
        outcome.iterations, c.tool_calls, c.tests_run, c.lint_runs, c.files_changed, c.violations
    );
    if !outcome.checkpoints.is_empty() {
        println!("  checkpoints: {}", outcome.checkpoints.join(", ").dimmed());
    }
    println!(
        "  tokens: {} prompt, {} completion",
        outcome.usage.prompt_tokens, outcome.usage.completion_tokens
    );
}

fn print_preflight(report: &PreflightReport) {
    for check in &report.checks {
        let mark = if !check.ok {
            "✗".red()
        } else if check.warn {
            "!".yellow()
        } else {
            "✓".green()
        };
        println!("{} {:<14} {} ({}ms)", mark, check.name, check.detail, check.elapsed_ms);
    }
    let verdict = if report.ready() {
        "ready".green().bold()
    } else {
        "not ready".red().bold()
    };
    println!(
        "{} ({} passed, {} warned, {} failed)",
        verdict,
        report.passed(),
        report.warned(),
        report.failed().len()
    );
}

async fn handle_run(
    config: &Config,
    objective: &str,
    workspace: &Path,
    mode: Option<corral::safety::ApprovalMode>,
    max_iterations: Option<u32>,
    spike: bool,
) -> Result<i32> {
    let task = Task::new(objective, workspace)
        .with_mode(mode.unwrap_or(config.approval_mode))
        .with_max_iterations(max_iterations.unwrap_or(config.agent.max_iterations))
        .with_spike(spike);
    info!("Running task {} in {} ({})", task.id, workspace.display(), task.effective_mode());

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm).context("Failed to build LLM client")?);
    let runner = assemble(task, config, llm, Arc::new(ConsolePrompter)).context("Failed to assemble task")?;

    println!(
        "{} {} {}",
        "Running".cyan().bold(),
        runner.task().id,
        format!("(mode: {})", runner.task().effective_mode()).dimmed()
    );
    let outcome = runner.run().await;
    print_outcome(&outcome);
    Ok(if outcome.succeeded() { 0 } else { 1 })
}

fn handle_rollback(config: &Config, workspace: &Path) -> Result<i32> {
    let git = GitCheckpointer::new(workspace, config.git.tag_prefix.clone());
    match git.rollback().context("Rollback failed")? {
        Some(tag) => {
            println!("{} restored {}", "Rolled back:".green(), tag);
            Ok(0)
        }
        None => {
            println!("{}", "No checkpoint to roll back to".yellow());
            Ok(1)
        }
    }
}

fn handle_tools(config: &Config, workspace: &Path) -> Result<i32> {
    let jail = Arc::new(FileJail::new(workspace, config.jail_config())?);
    let gate = Arc::new(CommandGate::new(jail.root(), config.gate_config()));
    let git = Arc::new(GitCheckpointer::new(jail.root(), config.git.tag_prefix.clone()));
    let registry = build_registry(jail, gate, git, config)?;

    let mut current = "";
    for (tool, action, description) in registry.list_actions() {
        if tool != current {
            println!("{}", tool.cyan().bold());
            current = tool;
        }
        println!("  {:<22} {}", action, description);
    }
    Ok(0)
}

async fn handle_preflight(config: &Config, workspace: &Path) -> Result<i32> {
    let jail = Arc::new(FileJail::new(workspace, config.jail_config())?);
    let gate = Arc::new(CommandGate::new(jail.root(), config.gate_config()));
    let git = Arc::new(GitCheckpointer::new(jail.root(), config.git.tag_prefix.clone()));
    let registry = Arc::new(build_registry(jail.clone(), gate, git.clone(), config)?);
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm)?);

    let report = WorkspacePreflight::new(jail.root(), llm, git)
        .with_registry(registry)
        .with_log_max_mb(config.cleanup.log_max_mb)
        .run_all()
        .await;
    print_preflight(&report);
    Ok(if report.ready() { 0 } else { 1 })
}

async fn run_application(cli: &Cli) -> Result<i32> {
    let workspace = cli.workspace();
    if !workspace.is_dir() {
        eyre::bail!("Workspace {} is not a directory", workspace.display());
    }

    let config = Config::load(cli.config.as_deref(), workspace).context("Failed to load configuration")?;
    setup_logging(workspace, &config.log_level, cli.is_verbose()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    match &cli.command {
        Commands::Run {
            task,
            workspace,
            mode,
            max_iterations,
            spike,
        } => handle_run(&config, task, workspace, *mode, *max_iterations, *spike).await,
        Commands::Rollback { workspace } => handle_rollback(&config, workspace),
        Commands::Tools { workspace } => handle_tools(&config, workspace),
        Commands::Preflight { workspace } => handle_preflight(&config, workspace).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run_application(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}
