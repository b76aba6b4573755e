//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// xplat - multi-platform container builds
///
/// Builds, runs and publishes containers for several OS/architecture
/// targets from one host, using emulation where the architecture differs.
#[derive(Parser, Debug)]
#[command(name = "xplat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "XPLAT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List recognized platforms, or validate one
    Platforms(PlatformsArgs),

    /// Show the host platform, backend and registered emulators
    Host,

    /// Run a command in one platform variant of an image
    Run(RunArgs),

    /// Run a command for several platforms concurrently
    Build(BuildArgs),

    /// List the filesystem of one platform variant of an image
    Inspect(InspectArgs),

    /// Manage cache volumes
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the platforms command
#[derive(Parser, Debug)]
pub struct PlatformsArgs {
    #[command(subcommand)]
    pub action: Option<PlatformsAction>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Platforms subcommands
#[derive(Subcommand, Debug)]
pub enum PlatformsAction {
    /// Validate a platform string and print its canonical form
    Parse {
        /// Platform text (e.g. linux/aarch64)
        text: String,
    },
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Target platform (os/arch[/variant]); defaults to engine.default_platform
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Image reference to start from (an empty root when omitted)
    #[arg(short, long)]
    pub image: Option<String>,

    /// Cache volume mounts (NAME:PATH)
    #[arg(long, value_parser = parse_cache_mount)]
    pub cache: Vec<(String, String)>,

    /// Environment variables (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Working directory inside the container
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Target platforms (comma-separated)
    #[arg(short, long, required = true)]
    pub platform: String,

    /// Image reference to start from; must provide every requested platform
    #[arg(short, long)]
    pub image: Option<String>,

    /// Cache volume mounts (NAME:PATH), shared by every platform
    #[arg(long, value_parser = parse_cache_mount)]
    pub cache: Vec<(String, String)>,

    /// Environment variables (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Working directory inside the container
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// Publish the results as one multi-platform image
    #[arg(long)]
    pub push: Option<String>,

    /// Maximum concurrent platform builds (0 = unbounded; default from config)
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Image reference
    pub image: String,

    /// Platform variant to inspect
    #[arg(short, long)]
    pub platform: String,

    /// Directory to list
    #[arg(long, default_value = "/")]
    pub path: String,

    /// Output format
    #[arg(short, long, default_value = "plain")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.parallelism)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List all cache volumes
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show details of one volume
    Info {
        /// Volume name
        name: String,
    },

    /// Remove one volume
    Rm {
        /// Volume name
        name: String,
    },

    /// Remove volumes older than N days
    Gc {
        /// Age threshold in days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every volume and prune the content store
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Parse a cache mount in NAME:PATH format
fn parse_cache_mount(s: &str) -> Result<(String, String), String> {
    let (name, path) = s
        .split_once(':')
        .ok_or_else(|| format!("invalid NAME:PATH format: no ':' found in '{s}'"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("invalid NAME:PATH format: '{s}'"));
    }
    Ok((name.to_string(), path.to_string()))
}
