//! Build command - run one command for several platforms concurrently

use crate::cli::args::{BuildArgs, OutputFormat};
use crate::cli::commands::run::Recipe;
use crate::config::Config;
use crate::coordinator::{BuildCoordinator, BuildOutcome};
use crate::engine::Engine;
use crate::error::{XplatError, XplatResult};
use crate::platform::Platform;
use crate::ui::{self, BuildBoard, UiContext};
use console::style;
use serde::Serialize;
use std::sync::Arc;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> XplatResult<()> {
    let ctx = UiContext::detect();
    let platforms = Platform::parse_list(&args.platform)?;
    let engine = Arc::new(Engine::new(config.clone())?);
    let recipe = Arc::new(Recipe {
        image: args.image,
        caches: args.cache,
        env: args.env,
        workdir: args.workdir,
        command: args.command,
    });

    let board = Arc::new(BuildBoard::new(&ctx, &platforms));
    let coordinator = BuildCoordinator::new(args.jobs.unwrap_or(config.build.parallelism));

    let units = coordinator.build_all_settled(&platforms, |platform| {
        let (engine, recipe, board) = (engine.clone(), recipe.clone(), board.clone());
        async move {
            board.running(&platform, &recipe.command.join(" "));
            let result = recipe.build(&engine, platform.clone()).await;
            match result {
                Ok(ref built) => {
                    let mode = built
                        .last_exec()
                        .map(|r| r.mode.to_string())
                        .unwrap_or_default();
                    board.finished(&platform, true, &mode);
                }
                Err(ref e) => board.finished(&platform, false, &e.to_string()),
            }
            result
        }
    });

    // Dropping the units aborts every in-flight platform
    let outcome = tokio::select! {
        outcome = units => outcome?,
        _ = tokio::signal::ctrl_c() => {
            return Err(XplatError::User("build interrupted".to_string()));
        }
    };

    match args.format {
        OutputFormat::Table => print_table(&outcome),
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Plain => print_plain(&outcome),
    }

    let built = outcome.into_result()?;

    if let Some(reference) = args.push {
        let published = engine.publish(&reference, built.containers()).await?;
        ui::step_ok_detail(
            &ctx,
            &format!("Published {} ({} platforms)", published.reference, published.variants.len()),
            &published.digest,
        );
    }

    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn print_table(outcome: &BuildOutcome) {
    println!("{:<16} {:<8} {:<26} {}", "PLATFORM", "STATUS", "MODE", "OUTPUT");
    println!("{}", "-".repeat(80));

    for (platform, result) in outcome.results() {
        match result {
            Ok(built) => {
                let (mode, out) = built
                    .last_exec()
                    .map(|r| (r.mode.to_string(), first_line(&r.stdout).to_string()))
                    .unwrap_or_default();
                println!(
                    "{:<16} {:<8} {:<26} {}",
                    platform.to_string(),
                    style("ok").green(),
                    mode,
                    out
                );
            }
            Err(e) => println!(
                "{:<16} {:<8} {:<26} {}",
                platform.to_string(),
                style("failed").red(),
                "-",
                e
            ),
        }
    }

    println!();
    println!(
        "Total: {} platform(s), {} failed",
        outcome.results().len(),
        outcome.failure_count()
    );
}

#[derive(Serialize)]
struct UnitJson<'a> {
    platform: &'a Platform,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a crate::exec::ExecReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rootfs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_json(outcome: &BuildOutcome) -> XplatResult<()> {
    let units: Vec<UnitJson> = outcome
        .results()
        .iter()
        .map(|(platform, result)| match result {
            Ok(built) => UnitJson {
                platform,
                ok: true,
                report: built.last_exec(),
                rootfs: built.rootfs().map(ToString::to_string),
                error: None,
            },
            Err(e) => UnitJson {
                platform,
                ok: false,
                report: None,
                rootfs: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&units)?);
    Ok(())
}

fn print_plain(outcome: &BuildOutcome) {
    for (platform, result) in outcome.results() {
        match result {
            Ok(built) => {
                let stdout = built.last_exec().map(|r| r.stdout.as_str()).unwrap_or_default();
                for line in stdout.lines() {
                    println!("{}: {}", platform, line);
                }
            }
            Err(e) => println!("{}: error: {}", platform, e),
        }
    }
}
