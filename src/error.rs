//! Error types for xplat
//!
//! All modules use `XplatResult<T>` as their return type.

use crate::platform::Platform;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for xplat operations
pub type XplatResult<T> = Result<T, XplatError>;

/// One failed unit of a multi-platform operation
#[derive(Debug)]
pub struct PlatformFailure {
    /// Platform the unit was scheduled for
    pub platform: Platform,
    /// Why it failed
    pub error: Box<XplatError>,
}

impl fmt::Display for PlatformFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.platform, self.error)
    }
}

/// All errors that can occur in xplat
#[derive(Error, Debug)]
pub enum XplatError {
    // Platform errors
    #[error("invalid platform '{input}': {reason}")]
    InvalidPlatform { input: String, reason: String },

    #[error("platform {0} specified more than once")]
    DuplicatePlatform(Platform),

    #[error("no variant for platform {platform} in {reference} (available: {available})")]
    PlatformNotFound {
        reference: String,
        platform: Platform,
        available: String,
    },

    #[error("build for {expected} produced a container for {actual}")]
    PlatformMismatch { expected: Platform, actual: Platform },

    // Execution errors
    #[error("cannot execute {platform} containers on a {host} host; filesystem inspection is still available")]
    UnsupportedExecution { platform: Platform, host: Platform },

    #[error("emulation for {arch} is not available: {reason}")]
    EmulationUnavailable { arch: String, reason: String },

    #[error("command {command} failed on {platform} with exit code {exit_code}: {stderr}")]
    ExecutionFailed {
        platform: Platform,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("execution backend {backend} is not available: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("container has not been evaluated; sync it before {0}")]
    UnresolvedContainer(String),

    // Aggregate errors
    #[error("{} of {total} platform units failed: {}", failures.len(), join_failures(failures))]
    Aggregate {
        total: usize,
        failures: Vec<PlatformFailure>,
    },

    // Registry errors
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("registry {operation} failed (transient): {reason}")]
    RegistryTransient { operation: String, reason: String },

    #[error("registry {operation} failed with status {status}: {reason}")]
    RegistryPermanent {
        operation: String,
        /// 0 when no response arrived
        status: u16,
        reason: String,
    },

    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("invalid manifest for {reference}: {reason}")]
    ManifestInvalid { reference: String, reason: String },

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    // Content store errors
    #[error("content not found in store: {0}")]
    ContentNotFound(String),

    #[error("path traversal detected in archive entry: {0}")]
    PathTraversal(String),

    // Cache errors
    #[error("invalid cache volume {name}: {reason}")]
    CacheVolumeInvalid { name: String, reason: String },

    #[error("cache volume not found: {0}")]
    CacheVolumeNotFound(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Invalid path: {path}: {reason}")]
    PathInvalid { path: PathBuf, reason: String },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

fn join_failures(failures: &[PlatformFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl XplatError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an invalid platform error
    pub fn invalid_platform(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPlatform {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable at a higher layer
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RegistryTransient { .. } => true,
            Self::Aggregate { failures, .. } => {
                !failures.is_empty() && failures.iter().all(|f| f.error.is_retryable())
            }
            _ => false,
        }
    }

    /// True when the command was started and then exited unsuccessfully,
    /// as opposed to never having been able to run.
    pub fn ran_and_failed(&self) -> bool {
        matches!(self, Self::ExecutionFailed { .. })
    }

    /// Per-platform failures carried by an aggregate error
    pub fn failures(&self) -> &[PlatformFailure] {
        match self {
            Self::Aggregate { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidPlatform { .. } => Some("Run: xplat platforms"),
            Self::UnsupportedExecution { .. } => {
                Some("Use: xplat inspect <ref> --platform <platform> to read the filesystem")
            }
            Self::EmulationUnavailable { .. } => {
                Some("Run: xplat config set emulation.auto_install true, or install qemu-user-static")
            }
            Self::BackendUnavailable { .. } => Some("Install rootless Podman 4.0 or newer"),
            Self::RegistryTransient { .. } => Some("The registry may be temporarily unavailable; retry"),
            _ => None,
        }
    }
}
