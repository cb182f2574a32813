//! kobuild - build target and base image resolution
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kobuild::cli::{Cli, Commands};
use kobuild::error::KoResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KoResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("kobuild=warn"),
        1 => EnvFilter::new("kobuild=info"),
        _ => EnvFilter::new("kobuild=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Targets(args) => kobuild::cli::commands::targets(args).await,
        Commands::Resolve(args) => kobuild::cli::commands::resolve(args).await,
    }
}
