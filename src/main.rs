//! xplat - multi-platform container builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xplat::cli::{Cli, Commands};
use xplat::config::{Config, ConfigManager};
use xplat::error::XplatResult;

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

fn init_logging(verbose: u8, config: &Config) {
    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let level = match verbose.max(u8::from(config.general.verbose)) {
        0 => "xplat=warn",
        1 => "xplat=info",
        _ => "xplat=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

async fn run() -> XplatResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;

    init_logging(cli.verbose, &config);
    debug!("Using config {}", manager.path().display());

    match cli.command {
        Commands::Platforms(args) => xplat::cli::commands::platforms(args, &config).await,
        Commands::Host => xplat::cli::commands::host(&config).await,
        Commands::Run(args) => xplat::cli::commands::run(args, &config).await,
        Commands::Build(args) => xplat::cli::commands::build(args, &config).await,
        Commands::Inspect(args) => xplat::cli::commands::inspect(args, &config).await,
        Commands::Cache(args) => xplat::cli::commands::cache(args, &config).await,
        Commands::Config(args) => xplat::cli::commands::config(args, &manager, &config).await,
    }
}
