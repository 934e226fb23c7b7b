//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use crate::release::Confirm;

/// fnrelease - Plan and apply serverless function releases.
#[derive(Parser, Debug)]
#[command(name = "fnrelease")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "FNRELEASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Where the desired and deployed backends come from.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Manifest listing the functions of the release.
    #[arg(long)]
    pub want: PathBuf,

    /// Manifest of the deployed functions. Listed from the project when omitted.
    #[arg(long)]
    pub have: Option<PathBuf>,

    /// Only deploy functions matching this filter (`group.fn`). Repeatable.
    #[arg(long)]
    pub only: Vec<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and the release manifest.
    Validate {
        /// Manifest listing the functions of the release.
        #[arg(long)]
        want: Option<PathBuf>,

        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the deployment plan.
    Plan {
        /// Backend sources.
        #[command(flatten)]
        backends: BackendArgs,
    },

    /// Apply the deployment plan.
    Apply {
        /// Backend sources.
        #[command(flatten)]
        backends: BackendArgs,

        /// Delete functions missing from the release without asking.
        #[arg(short, long)]
        force: bool,

        /// Never prompt. Pending deletions abort the release unless --force is set.
        #[arg(long)]
        non_interactive: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Asks on stderr and reads the answer from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, message: &str) -> bool {
        eprint!("{message} [y/N]: ");
        if std::io::stderr().flush().is_err() {
            return false;
        }

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        is_yes(&input)
    }
}

fn is_yes(input: &str) -> bool {
    let answer = input.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
