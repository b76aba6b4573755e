//! Cache command - manage cache volumes

use crate::cache::{format_bytes, CacheVolume, CacheVolumes};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::XplatResult;
use crate::store::ContentStore;
use crate::ui::{self, UiContext};
use chrono::Utc;
use console::style;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> XplatResult<()> {
    let volumes = CacheVolumes::open(config.state_dir().join("volumes"))?;

    match args.action {
        CacheAction::List { format } => list_volumes(&volumes, format),
        CacheAction::Info { name } => show_info(&volumes, &name),
        CacheAction::Rm { name } => {
            volumes.remove(&name)?;
            ui::step_ok(&UiContext::detect(), &format!("Removed cache volume {}", name));
            Ok(())
        }
        CacheAction::Gc { days, dry_run } => gc_volumes(&volumes, config, days, dry_run),
        CacheAction::Clear { yes } => clear_all(&volumes, config, yes).await,
    }
}

fn list_volumes(volumes: &CacheVolumes, format: OutputFormat) -> XplatResult<()> {
    let all = volumes.list()?;

    match format {
        OutputFormat::Table => {
            if all.is_empty() {
                println!("No cache volumes found.");
                return Ok(());
            }
            println!("{:<30} {:<12} {:<20}", "VOLUME", "SIZE", "CREATED");
            println!("{}", "-".repeat(64));
            for volume in &all {
                let size = volumes.size(&volume.name).unwrap_or(0);
                println!(
                    "{:<30} {:<12} {:<20}",
                    volume.name,
                    format_bytes(size),
                    volume.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!();
            println!("Total: {} volume(s)", all.len());
        }
        OutputFormat::Json => {
            #[derive(serde::Serialize)]
            struct VolumeJson<'a> {
                name: &'a str,
                path: String,
                size_bytes: u64,
                created_at: String,
            }

            let rows: Vec<VolumeJson> = all
                .iter()
                .map(|v| VolumeJson {
                    name: &v.name,
                    path: v.path.display().to_string(),
                    size_bytes: volumes.size(&v.name).unwrap_or(0),
                    created_at: v.created_at.to_rfc3339(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Plain => {
            for volume in &all {
                println!("{}", volume.name);
            }
        }
    }

    Ok(())
}

fn show_info(volumes: &CacheVolumes, name: &str) -> XplatResult<()> {
    let ctx = UiContext::detect();
    let volume = volumes.get(name)?;
    let age_days = (Utc::now() - volume.created_at).num_days();

    ui::key_value(&ctx, "Name", &volume.name);
    ui::key_value(&ctx, "Path", &volume.path.display().to_string());
    ui::key_value(&ctx, "Size", &format_bytes(volumes.size(name)?));
    ui::key_value(
        &ctx,
        "Created",
        &format!("{} ({} days ago)", volume.created_at.to_rfc3339(), age_days),
    );
    Ok(())
}

fn gc_volumes(volumes: &CacheVolumes, config: &Config, days: Option<u32>, dry_run: bool) -> XplatResult<()> {
    let gc_days = days.unwrap_or(config.cache.gc_days);
    if gc_days == 0 {
        println!("Cache GC is disabled (gc_days = 0)");
        return Ok(());
    }

    let old: Vec<CacheVolume> = volumes
        .list()?
        .into_iter()
        .filter(|v| v.is_older_than_days(gc_days))
        .collect();

    if old.is_empty() {
        println!("No cache volumes older than {} days.", gc_days);
        return Ok(());
    }

    println!("Found {} volume(s) older than {} days:", old.len(), gc_days);
    for volume in &old {
        println!("  {} {}", style("•").red(), volume.name);
    }

    if dry_run {
        println!();
        println!("Dry run - no volumes removed.");
        return Ok(());
    }

    for volume in &old {
        debug!("Removing cache volume {}", volume.name);
        volumes.remove(&volume.name)?;
    }
    println!("{} removed {} volume(s)", style("✓").green(), old.len());
    Ok(())
}

async fn clear_all(volumes: &CacheVolumes, config: &Config, yes: bool) -> XplatResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let all = volumes.list()?;

    println!("This will remove {} cache volume(s) and prune the content store:", all.len());
    for volume in &all {
        println!("  {} {}", style("•").red(), volume.name);
    }

    if !ui::confirm(&ctx, "Are you sure?", false).await? {
        println!("Aborted.");
        return Ok(());
    }

    for volume in &all {
        volumes.remove(&volume.name)?;
    }

    // Trees are re-derivable from the registry and recipes
    let store = ContentStore::open(config.state_dir().join("store"))?;
    let stats = store.gc(&[])?;

    ui::step_ok_detail(
        &ctx,
        &format!("Cleared {} volume(s)", all.len()),
        &format!("{} trees, {} freed", stats.removed_count, format_bytes(stats.freed_bytes)),
    );
    Ok(())
}
