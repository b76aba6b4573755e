//! Inspect command - list a variant's filesystem without executing it

use crate::cli::args::{InspectArgs, OutputFormat};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::XplatResult;
use crate::platform::Platform;

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> XplatResult<()> {
    let platform = Platform::parse(&args.platform)?;
    let engine = Engine::new(config.clone())?;

    let container = engine.from_image(&args.image, &platform).await?;
    let dir = engine.directory(&container, &args.path).await?;
    let entries = engine.entries(&dir, "/").await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Table => {
            println!("{} {} ({})", args.image, platform, args.path);
            println!("{}", "-".repeat(40));
            for name in &entries {
                println!("  {}", name);
            }
            println!();
            println!("Total: {} entries", entries.len());
        }
        OutputFormat::Plain => {
            for name in &entries {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
