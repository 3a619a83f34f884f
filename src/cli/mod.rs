//! CLI module for DriftGuard.
//!
//! This module provides the command-line interface for validating
//! policies, checking single resources and running detection cycles.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
