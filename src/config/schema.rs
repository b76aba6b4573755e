//! Configuration schema for xplat
//!
//! Configuration is stored at `~/.config/xplat/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Engine settings
    pub engine: EngineConfig,

    /// Multi-platform build settings
    pub build: BuildConfig,

    /// Cross-architecture emulation settings
    pub emulation: EmulationConfig,

    /// Execution backend settings
    pub backend: BackendConfig,

    /// Registry settings
    pub registry: RegistryConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// State directory (default: platform state dir + "xplat")
    pub state_dir: Option<PathBuf>,

    /// Platform containers default to, and that the executor treats as native
    pub default_platform: Option<String>,
}

/// Multi-platform build settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum platform units running at once (0 = unbounded)
    pub parallelism: usize,
}

/// Emulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationConfig {
    /// Allow running foreign-architecture containers under emulation
    pub enabled: bool,

    /// Register missing binfmt_misc handlers automatically
    pub auto_install: bool,

    /// Image used to register qemu-user handlers
    pub installer_image: String,

    /// binfmt_misc mount point
    pub binfmt_dir: PathBuf,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_install: false,
            installer_image: "docker.io/tonistiigi/binfmt:latest".to_string(),
            binfmt_dir: PathBuf::from("/proc/sys/fs/binfmt_misc"),
        }
    }
}

/// Execution backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend kind ("podman")
    pub kind: String,

    /// Podman binary
    pub podman_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "podman".to_string(),
            podman_path: "podman".to_string(),
        }
    }
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry kind: "local" or "http"
    pub kind: String,

    /// Root of the local registry (default: state dir + "registry")
    pub local_path: Option<PathBuf>,

    /// Talk plain HTTP to remote registries
    pub insecure: bool,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            local_path: None,
            insecure: false,
            timeout_secs: 60,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `cache clear` without --all removes volumes older than N days (0 = disabled)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { gc_days: 30 }
    }
}
