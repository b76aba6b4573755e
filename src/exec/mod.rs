//! Platform-aware command execution
//!
//! The [`Executor`] decides how a request for a given platform runs on this
//! host:
//!
//! | Target vs host | Mode |
//! |----------------|------|
//! | different OS family | rejected (`UnsupportedExecution`) |
//! | same architecture | native |
//! | different architecture | emulated (after `Emulator::ensure`) |
//!
//! The actual process launch is delegated to an [`ExecBackend`].

pub mod backend;
pub mod emulation;
pub mod executor;
pub mod factory;
pub mod podman;

pub use backend::ExecBackend;
pub use emulation::{BinfmtEmulator, Emulator, NoEmulation};
pub use executor::Executor;
pub use factory::create_executor;
pub use podman::PodmanBackend;

use crate::platform::Platform;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A host directory bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Host path
    pub host: PathBuf,
    /// Absolute path inside the container
    pub target: String,
}

/// One command to run inside a materialized root filesystem
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Target platform
    pub platform: Platform,
    /// Writable host copy of the container root
    pub rootfs: PathBuf,
    /// Command and arguments
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub mounts: Vec<BindMount>,
}

/// How a request was executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecMode {
    Native,
    Emulated { emulator: String },
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Emulated { emulator } => write!(f, "emulated via {}", emulator),
        }
    }
}

/// Raw process output from a backend
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Result of a successful execution.
///
/// `platform` is what the command observed about itself (the target);
/// `host` is where the process hosting it was scheduled.
#[derive(Debug, Clone, Serialize)]
pub struct ExecReport {
    pub platform: Platform,
    pub host: Platform,
    #[serde(flatten)]
    pub mode: ExecMode,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
