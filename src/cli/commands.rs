//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: drive one task to completion in a workspace
//! - rollback: undo the newest checkpoint
//! - tools: list the actions the model may call
//! - preflight: report workspace readiness

use clap::{Parser, Subcommand};
use corral::safety::ApprovalMode;
use std::path::PathBuf;

/// Corral - a workspace-jailed, checkpointed tool loop for local coding agents
#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Workspace the chosen subcommand operates on
    pub fn workspace(&self) -> &PathBuf {
        match &self.command {
            Commands::Run { workspace, .. }
            | Commands::Rollback { workspace }
            | Commands::Tools { workspace }
            | Commands::Preflight { workspace } => workspace,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a task against a workspace
    Run {
        /// What the agent should do
        task: String,

        /// Workspace directory the agent is confined to
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Approval mode: auto, ask or paranoid (defaults to config)
        #[arg(short, long)]
        mode: Option<ApprovalMode>,

        /// Iteration ceiling (defaults to config)
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Low-confidence mode: stricter prompting, never unattended
        #[arg(long)]
        spike: bool,
    },

    /// Undo the newest checkpoint in a workspace
    Rollback {
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// List every registered tool action
    Tools {
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Run preflight checks and print the report
    Preflight {
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["corral"]).is_err());
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["corral", "run", "Add subtract"]).unwrap();
        match &cli.command {
            Commands::Run {
                task,
                workspace,
                mode,
                max_iterations,
                spike,
            } => {
                assert_eq!(task, "Add subtract");
                assert_eq!(workspace, &PathBuf::from("."));
                assert!(mode.is_none());
                assert!(max_iterations.is_none());
                assert!(!spike);
            }
            _ => panic!("Expected run command"),
        }
        assert!(!cli.is_verbose());
    }

    #[test]
    fn test_run_with_options() {
        let cli = Cli::try_parse_from([
            "corral",
            "-v",
            "run",
            "Fix tests",
            "-w",
            "/tmp/ws",
            "-m",
            "paranoid",
            "--max-iterations",
            "7",
            "--spike",
        ])
        .unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.workspace(), &PathBuf::from("/tmp/ws"));
        match cli.command {
            Commands::Run {
                mode,
                max_iterations,
                spike,
                ..
            } => {
                assert_eq!(mode, Some(ApprovalMode::Paranoid));
                assert_eq!(max_iterations, Some(7));
                assert!(spike);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(Cli::try_parse_from(["corral", "run", "x", "-m", "yolo"]).is_err());
    }

    #[test]
    fn test_other_subcommands() {
        let cli = Cli::try_parse_from(["corral", "rollback", "-w", "ws"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { .. }));
        assert_eq!(cli.workspace(), &PathBuf::from("ws"));

        let cli = Cli::try_parse_from(["corral", "-c", "/etc/corral.yml", "tools"]).unwrap();
        assert!(matches!(cli.command, Commands::Tools { .. }));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/corral.yml")));

        let cli = Cli::try_parse_from(["corral", "preflight"]).unwrap();
        assert!(matches!(cli.command, Commands::Preflight { .. }));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
