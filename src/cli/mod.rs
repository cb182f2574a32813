//! Command-line interface

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, OutputFormat};

use crate::config::BuildOptions;
use std::path::PathBuf;

/// Build options for a command's optional working directory
pub(crate) fn build_options(working_directory: Option<PathBuf>) -> BuildOptions {
    BuildOptions::new(working_directory.unwrap_or_default())
}
