//! CLI module for the fnrelease tool.
//!
//! This module provides the command-line interface for planning and
//! applying function releases.

mod commands;
mod output;

pub use commands::{BackendArgs, Cli, Commands, OutputFormat, StdinConfirm};
pub use output::OutputFormatter;
