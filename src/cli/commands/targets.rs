//! Targets command - show the import path map

use crate::cli::args::{OutputFormat, TargetsArgs};
use crate::cli::build_options;
use crate::config::BuildConfig;
use crate::error::KoResult;
use crate::plan::Invocation;
use crate::target::ResolvedTargetMap;
use console::style;

/// Execute the targets command
pub async fn execute(args: TargetsArgs) -> KoResult<()> {
    let invocation = Invocation::load(build_options(args.working_directory)).await?;
    let targets = invocation.targets()?;

    match args.format {
        OutputFormat::Table => print_table(&targets),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&targets)?),
        OutputFormat::Plain => {
            for import_path in targets.import_paths() {
                println!("{}", import_path);
            }
        }
    }

    Ok(())
}

fn print_table(targets: &ResolvedTargetMap) {
    println!(
        "{:<50} {:<16} {:<30}",
        style("IMPORT PATH").bold(),
        style("ID").bold(),
        style("LOCATION").bold()
    );
    println!("{}", "-".repeat(96));

    for (import_path, config) in targets {
        println!(
            "{:<50} {:<16} {:<30}",
            import_path,
            config.id.as_deref().unwrap_or("-"),
            location(config)
        );
    }

    println!();
    println!("{} target(s)", targets.len());
}

fn location(config: &BuildConfig) -> String {
    match (config.dir.as_deref(), config.main.as_deref()) {
        (None, None) => ".".to_string(),
        (Some(dir), None) => dir.to_string(),
        (None, Some(main)) => main.to_string(),
        (Some(dir), Some(main)) => format!("{}/{}", dir.trim_end_matches('/'), main),
    }
}
