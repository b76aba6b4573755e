//! Platforms command - list recognized platforms or validate one

use crate::cli::args::{OutputFormat, PlatformsAction, PlatformsArgs};
use crate::config::Config;
use crate::error::XplatResult;
use crate::platform::Platform;
use console::style;
use serde::Serialize;

/// Execute the platforms command
pub async fn execute(args: PlatformsArgs, config: &Config) -> XplatResult<()> {
    let host = config.default_platform()?;

    match args.action {
        Some(PlatformsAction::Parse { text }) => {
            let platform = Platform::parse(&text)?;
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&row(&platform, &host))?),
                _ => println!("{}", platform),
            }
        }
        None => {
            let known = Platform::known();
            match args.format {
                OutputFormat::Table => print_table(&known, &host),
                OutputFormat::Json => {
                    let rows: Vec<PlatformRow> = known.iter().map(|p| row(p, &host)).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
                OutputFormat::Plain => {
                    for platform in &known {
                        println!("{}", platform);
                    }
                }
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct PlatformRow {
    platform: String,
    os: &'static str,
    architecture: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variant: Option<String>,
    execution: &'static str,
}

/// How `platform` would run on `host`
fn execution(platform: &Platform, host: &Platform) -> &'static str {
    if !platform.supports_execution_on(host) {
        "inspect-only"
    } else if platform.matches(host) {
        "native"
    } else {
        "emulated"
    }
}

fn row(platform: &Platform, host: &Platform) -> PlatformRow {
    PlatformRow {
        platform: platform.to_string(),
        os: platform.os().as_str(),
        architecture: platform.arch().as_str(),
        variant: platform.variant().map(str::to_string),
        execution: execution(platform, host),
    }
}

fn print_table(platforms: &[Platform], host: &Platform) {
    println!("{:<18} {:<10} {:<10} {:<8} {}", "PLATFORM", "OS", "ARCH", "VARIANT", "EXECUTION");
    println!("{}", "-".repeat(64));

    for platform in platforms {
        let mode = match execution(platform, host) {
            "native" => style("native").green().to_string(),
            "emulated" => style("emulated").cyan().to_string(),
            other => style(other).dim().to_string(),
        };
        println!(
            "{:<18} {:<10} {:<10} {:<8} {}",
            platform.to_string(),
            platform.os().as_str(),
            platform.arch().as_str(),
            platform.variant().unwrap_or("-"),
            mode
        );
    }

    println!();
    println!("Host: {}", host);
}
