//! Resolve command - pin the base image of every target

use crate::base::{BaseImageReport, BaseImageSettings, BaseSource};
use crate::cli::args::{OutputFormat, ResolveArgs};
use crate::cli::build_options;
use crate::error::KoResult;
use crate::plan::{BuildPlan, Invocation};
use console::style;
use serde_json::{json, Map, Value};

/// Execute the resolve command
pub async fn execute(args: ResolveArgs) -> KoResult<()> {
    let mut options = build_options(args.working_directory).with_platforms(args.platform);
    if let Some(image) = args.base_image {
        options = options.with_base_image(image);
    }

    let invocation = Invocation::load(options).await?;
    let settings = BaseImageSettings::from_config(&invocation.config, &invocation.options);
    let plan = invocation.plan(invocation.registry_client()).await?;

    let source = |import_path: &str| settings.select_reference(import_path).1;
    match args.format {
        OutputFormat::Table => print_table(&plan, source),
        OutputFormat::Json => print_json(&plan.bases, source)?,
        OutputFormat::Plain => print_plain(&plan.bases),
    }

    plan.bases.into_result().map(|_| ())
}

fn print_table(plan: &BuildPlan, source: impl Fn(&str) -> BaseSource) {
    println!(
        "{} {}",
        style("Platform:").bold(),
        style(&plan.platform).cyan()
    );
    println!();
    println!(
        "{:<45} {:<20} {}",
        style("IMPORT PATH").bold(),
        style("SOURCE").bold(),
        style("BASE IMAGE").bold()
    );
    println!("{}", "-".repeat(110));

    for (import_path, result) in &plan.bases.results {
        let source = source(import_path).to_string();
        match result {
            Ok(base) => println!("{:<45} {:<20} {}", import_path, source, base.reference),
            Err(e) => println!(
                "{:<45} {:<20} {}",
                import_path,
                source,
                style(format!("failed: {}", e)).red()
            ),
        }
    }

    let failed = plan.bases.failures().count();
    println!();
    if failed == 0 {
        println!(
            "{} {} base image(s) resolved",
            style("[OK]").green(),
            plan.bases.results.len()
        );
    } else {
        println!(
            "{} {} of {} target(s) failed",
            style("[ERROR]").red(),
            failed,
            plan.bases.results.len()
        );
    }
}

fn print_json(bases: &BaseImageReport, source: impl Fn(&str) -> BaseSource) -> KoResult<()> {
    let mut out = Map::new();
    for (import_path, result) in &bases.results {
        let entry = match result {
            Ok(base) => json!({
                "source": source(import_path),
                "reference": base.reference,
                "descriptor": base.descriptor,
            }),
            Err(e) => json!({
                "source": source(import_path),
                "error": e.to_string(),
            }),
        };
        out.insert(import_path.clone(), entry);
    }

    println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
    Ok(())
}

fn print_plain(bases: &BaseImageReport) {
    for (import_path, result) in &bases.results {
        match result {
            Ok(base) => println!("{} {}", import_path, base.reference),
            Err(_) => println!("{} -", import_path),
        }
    }
}
