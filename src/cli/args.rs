//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// kobuild - build target and base image resolution
///
/// Maps Go build configs to import paths and pins the base image each
/// target is layered onto.
#[derive(Parser, Debug)]
#[command(name = "kobuild")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the import path of every build target
    Targets(TargetsArgs),

    /// Resolve and pin the base image of every build target
    Resolve(ResolveArgs),
}

/// Arguments for the targets command
#[derive(Parser, Debug)]
pub struct TargetsArgs {
    /// Working directory (defaults to the current directory)
    #[arg(short = 'C', long = "dir", value_name = "DIR")]
    pub working_directory: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the resolve command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Working directory (defaults to the current directory)
    #[arg(short = 'C', long = "dir", value_name = "DIR")]
    pub working_directory: Option<PathBuf>,

    /// Base image for every target, overriding configuration
    #[arg(long, value_name = "REF")]
    pub base_image: Option<String>,

    /// Target platforms (os/arch[/variant], comma separated, or "all")
    #[arg(long, value_delimiter = ',', value_name = "PLATFORM")]
    pub platform: Vec<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
